//! The batched, cursor-advancing table reader (spec component: `CursorBatchReader`).

use archive_core::{ArchiveError, BatchCursor, Row};
use chrono::NaiveDate;
use sqlx::any::AnyRow;
use tokio_util::sync::CancellationToken;

use crate::gateway::DatabaseGateway;
use crate::row_decode::decode_row;
use crate::sql_builder::build_select_batch;

/// Produces one batch of rows strictly older than `cutoff`, resuming after `cursor`.
///
/// Guarantees: each returned batch's rows are ordered by `(date, pk)` ascending, and the
/// last row's `(date, pk)` is strictly greater than `cursor` when `cursor` is non-empty.
/// An empty result is terminal for the calling phase.
pub struct CursorBatchReader<'a> {
    gateway: &'a DatabaseGateway,
}

impl<'a> CursorBatchReader<'a> {
    pub fn new(gateway: &'a DatabaseGateway) -> Self {
        Self { gateway }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn next(
        &self,
        connection: &str,
        table: &str,
        date_column: &str,
        primary_key_column: &str,
        cutoff: NaiveDate,
        size: i64,
        cursor: &BatchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, ArchiveError> {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let pool = self
            .gateway
            .pool(connection)
            .await
            .map_err(ArchiveError::Other)?;

        let has_cursor = !cursor.is_empty();
        let sql = build_select_batch(table, date_column, primary_key_column, has_cursor)?;

        let cutoff_dt = cutoff.and_hms_opt(0, 0, 0).expect("midnight is always valid");

        let mut query = sqlx::query(&sql).bind(cutoff_dt);
        if has_cursor {
            let last_date = cursor
                .last_date
                .expect("cursor.is_empty() already checked last_date is Some");
            let last_pk = cursor
                .last_primary_key
                .clone()
                .expect("cursor.is_empty() already checked last_primary_key is Some");
            query = query.bind(last_date).bind(last_date).bind(last_pk);
        }
        query = query.bind(size);

        let rows: Vec<AnyRow> = query
            .fetch_all(pool.as_ref())
            .await
            .map_err(|e| ArchiveError::TransientDatabase(e.to_string()))?;

        rows.iter().map(decode_row).collect()
    }
}

/// Derives the next cursor position from the last row of a non-empty batch.
pub fn advance_cursor(
    batch: &[Row],
    date_column: &str,
    primary_key_column: &str,
) -> Result<BatchCursor, ArchiveError> {
    let last = batch.last().ok_or_else(|| {
        ArchiveError::Configuration("cannot advance cursor from an empty batch".into())
    })?;

    let date_value = last.get(date_column).ok_or_else(|| {
        ArchiveError::Configuration(format!("row missing date column '{date_column}'"))
    })?;
    let last_date = match date_value {
        archive_core::Value::DateTime(dt) => dt.naive_utc(),
        archive_core::Value::Date(d) => d.and_hms_opt(0, 0, 0).expect("midnight is always valid"),
        other => {
            return Err(ArchiveError::Configuration(format!(
                "date column '{date_column}' is not a date/datetime value: {other:?}"
            )))
        }
    };

    let pk_value = last.get(primary_key_column).ok_or_else(|| {
        ArchiveError::Configuration(format!(
            "row missing primary key column '{primary_key_column}'"
        ))
    })?;
    let last_pk = pk_value.to_display_string().ok_or_else(|| {
        ArchiveError::Configuration(format!(
            "primary key column '{primary_key_column}' is null"
        ))
    })?;

    Ok(BatchCursor {
        last_date: Some(last_date),
        last_primary_key: Some(last_pk),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::Value;

    #[test]
    fn advance_cursor_uses_last_row_of_batch() {
        let mut row1 = Row::new();
        row1.insert("id".to_string(), Value::Int(1));
        row1.insert(
            "created_at".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        );
        let mut row2 = Row::new();
        row2.insert("id".to_string(), Value::Int(2));
        row2.insert(
            "created_at".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
        );

        let cursor = advance_cursor(&[row1, row2], "created_at", "id").unwrap();
        assert_eq!(cursor.last_primary_key, Some("2".to_string()));
    }

    #[test]
    fn advance_cursor_rejects_empty_batch() {
        let err = advance_cursor(&[], "created_at", "id").unwrap_err();
        assert!(matches!(err, ArchiveError::Configuration(_)));
    }
}
