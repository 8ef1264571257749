//! `SqlSettingsProvider`: reads `ArchiveSettings` through the control connection.

use archive_core::{ArchiveError, ArchiveSetting, Row, SettingsProvider, Value};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::any::AnyRow;
use sqlx::AnyPool;
use tokio_util::sync::CancellationToken;

use crate::row_decode::decode_row;

pub struct SqlSettingsProvider {
    pool: AnyPool,
}

impl SqlSettingsProvider {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsProvider for SqlSettingsProvider {
    async fn list_all(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<ArchiveSetting>> {
        if cancel.is_cancelled() {
            anyhow::bail!(ArchiveError::Cancelled);
        }
        let rows: Vec<AnyRow> = sqlx::query("SELECT * FROM \"ArchiveSettings\"")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| decode_row(r).map_err(anyhow::Error::from))
            .map(|r| r.and_then(|row| row_to_setting(&row).map_err(anyhow::Error::from)))
            .collect()
    }
}

fn row_to_setting(row: &Row) -> Result<ArchiveSetting, ArchiveError> {
    Ok(ArchiveSetting {
        id: required_int(row, "id")?,
        enabled: required_bool(row, "enabled")?,
        source_connection: required_text(row, "sourceConnectionName")?,
        target_connection: required_text(row, "targetConnectionName")?,
        table_name: required_text(row, "tableName")?,
        date_column: required_text(row, "dateColumn")?,
        primary_key_column: required_text(row, "primaryKeyColumn")?,
        online_cutoff: required_date(row, "onlineRetentionDate")?,
        history_cutoff: required_date(row, "historyRetentionDate")?,
        batch_size: optional_int(row, "batchSize").unwrap_or(0),
        csv_enabled: optional_bool(row, "csvEnabled").unwrap_or(false),
        csv_root_folder: row
            .get("csvRootFolder")
            .and_then(Value::to_display_string),
        physical_delete_enabled: optional_bool(row, "isPhysicalDeleteEnabled").unwrap_or(true),
    })
}

fn missing(column: &str) -> ArchiveError {
    ArchiveError::Configuration(format!("ArchiveSettings row missing column '{column}'"))
}

fn required_int(row: &Row, column: &str) -> Result<i64, ArchiveError> {
    match row.get(column) {
        Some(Value::Int(i)) => Ok(*i),
        Some(Value::Float(f)) => Ok(*f as i64),
        _ => Err(missing(column)),
    }
}

fn optional_int(row: &Row, column: &str) -> Option<i64> {
    match row.get(column) {
        Some(Value::Int(i)) => Some(*i),
        Some(Value::Float(f)) => Some(*f as i64),
        _ => None,
    }
}

fn required_bool(row: &Row, column: &str) -> Result<bool, ArchiveError> {
    match row.get(column) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Int(i)) => Ok(*i != 0),
        _ => Err(missing(column)),
    }
}

fn optional_bool(row: &Row, column: &str) -> Option<bool> {
    match row.get(column) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Int(i)) => Some(*i != 0),
        _ => None,
    }
}

fn required_text(row: &Row, column: &str) -> Result<String, ArchiveError> {
    match row.get(column) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(missing(column)),
    }
}

fn required_date(row: &Row, column: &str) -> Result<NaiveDate, ArchiveError> {
    match row.get(column) {
        Some(Value::Date(d)) => Ok(*d),
        Some(Value::DateTime(dt)) => Ok(dt.naive_utc().date()),
        _ => Err(missing(column)),
    }
}
