//! Generic decoding of `sqlx::any::AnyRow` into [`archive_core::Row`].
//!
//! `sqlx::Any` erases the underlying driver's rich type system, so columns are decoded
//! by attempting each scalar type in turn rather than by reading driver-specific type
//! metadata, the same approach a generic SQL client takes when the column set is only
//! known at query time.

use archive_core::{ArchiveError, Row, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row as _};

/// Decodes every column of `row` into an [`archive_core::Row`], preserving column order.
pub fn decode_row(row: &AnyRow) -> Result<Row, ArchiveError> {
    let mut out = Row::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = decode_column(row, column.ordinal())?;
        out.insert(name, value);
    }
    Ok(out)
}

fn decode_column(row: &AnyRow, index: usize) -> Result<Value, ArchiveError> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map(Value::Int).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return Ok(v.map(|x| Value::Int(x as i64)).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map(Value::Float).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.map(Value::Bool).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return Ok(v.map(Value::DateTime).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return Ok(v.map(Value::Date).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Ok(v.map(Value::Text).unwrap_or(Value::Null));
    }

    Err(ArchiveError::Configuration(format!(
        "column at index {index} could not be decoded by any supported scalar type"
    )))
}

/// Extracts the primary key column of a decoded row as its display string, failing with
/// `ArchiveError::Configuration` when it is missing, null, or blank as required for the
/// de-duplication filter step.
pub fn primary_key_string(row: &Row, primary_key_column: &str) -> Result<String, ArchiveError> {
    let value = row.get(primary_key_column).ok_or_else(|| {
        ArchiveError::Configuration(format!("row missing primary key column '{primary_key_column}'"))
    })?;
    let s = value.to_display_string().ok_or_else(|| {
        ArchiveError::Configuration(format!(
            "primary key column '{primary_key_column}' is null"
        ))
    })?;
    if s.trim().is_empty() {
        return Err(ArchiveError::Configuration(format!(
            "primary key column '{primary_key_column}' is blank"
        )));
    }
    Ok(s)
}
