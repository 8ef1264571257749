//! # Archive Core - Lifecycle Pipeline Core Library
//!
//! This crate provides the foundational types, traits, and configuration structures for
//! the age-based data archival engine. It defines the dynamic row representation, the
//! per-table archive contract, the collaborator traits consumed by the engine, and the
//! error taxonomy used throughout the pipeline.
//!
//! ## Key Components
//!
//! - **Row / Value**: a dynamic, ordered column representation since archived tables are
//!   only known at configuration time, not at compile time.
//! - **ArchiveSetting**: the per-table contract describing cutoffs, connections, and
//!   CSV/delete policy.
//! - **SettingsProvider / AuditWriter**: the interfaces the engine consumes; concrete
//!   SQL-backed implementations live in `archive-db`.
//! - **Error Handling**: a single `ArchiveError` enum classifying failures by retry
//!   eligibility.
//!
//! ## Example Usage
//!
//! ```rust
//! use archive_core::{ArchiveSetting, Row, Value};
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut row = Row::new();
//! row.insert("id".to_string(), Value::Int(1));
//! row.insert("created_at".to_string(), Value::Text("2024-01-01".to_string()));
//! assert_eq!(row.get("id"), Some(&Value::Int(1)));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A single cell value in a dynamically-shaped row.
///
/// Tables archived by this engine are discovered from `ArchiveSettings` at run time, so
/// rows cannot be modeled as compile-time structs. This enum covers the scalar types the
/// engine needs to move, de-duplicate, and render to CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(chrono::NaiveDate),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl Value {
    /// Renders the value using invariant formatting, suitable for CSV cells and for
    /// building primary-key strings used in the target-side existence check.
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Some(dt.to_rfc3339()),
        }
    }
}

/// An ordered name-to-value mapping representing one database row.
///
/// Column order is preserved as returned by the source query, since the CSV writer and
/// audit log both rely on a stable column order.
pub type Row = IndexMap<String, Value>;

/// Error taxonomy for archive pipeline operations.
///
/// Variants are classified by how the engine and `RetryExecutor` should react to them,
/// not by which collaborator raised them.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A setting or row was malformed in a way no retry can fix: a blank primary key, a
    /// non-positive batch parameter, or an identifier that fails the allow-list.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A database failure that is expected to clear on its own, such as a deadlock
    /// victim or a dropped connection during a read.
    #[error("transient database error: {0}")]
    TransientDatabase(String),

    /// The database reported that a query ran past its allotted time. Treated as
    /// structural, not retried.
    #[error("query execution timed out after {0:?}")]
    QueryExecutionTimeout(std::time::Duration),

    /// A filesystem operation failed: permission denied, disk full, or an invalid
    /// filename produced by the CSV template.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// Cooperative cancellation was observed at a suspension point.
    #[error("run was cancelled")]
    Cancelled,

    /// Wraps an error from a collaborator that does not need first-class classification.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArchiveError {
    /// Default retryable-failure classification used by `RetryExecutor` unless a caller
    /// supplies its own predicate.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, ArchiveError::TransientDatabase(_))
    }
}

/// The per-table archive contract. Loaded once per run and treated as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSetting {
    /// Stable identity, also used as the audit log's foreign key.
    pub id: i64,

    pub enabled: bool,

    /// Logical name or full connection string for the source (online) database.
    pub source_connection: String,

    /// Logical name or full connection string for the target (historical) database.
    pub target_connection: String,

    pub table_name: String,
    pub date_column: String,
    pub primary_key_column: String,

    /// Rows strictly older than this date move from source to target.
    pub online_cutoff: NaiveDate,

    /// Rows strictly older than this date export from target to CSV.
    pub history_cutoff: NaiveDate,

    /// `0` means "use the engine default of 1000".
    #[serde(default)]
    pub batch_size: i64,

    #[serde(default)]
    pub csv_enabled: bool,

    #[serde(default)]
    pub csv_root_folder: Option<String>,

    /// If false, Phase 1 copies into target but never deletes from source.
    #[serde(default = "default_physical_delete_enabled")]
    pub physical_delete_enabled: bool,
}

fn default_physical_delete_enabled() -> bool {
    true
}

impl ArchiveSetting {
    /// Validates that cutoffs are ordered correctly, returning a human-readable warning
    /// message when they are not. Dates are already date-only (no time component), so no
    /// time zone conversion happens here; see [`crate::utc_today`] for "today" resolution.
    pub fn validate_cutoffs(&self) -> Result<(), String> {
        if self.online_cutoff <= self.history_cutoff {
            return Err(format!(
                "online retention must be later than history retention (online={}, history={})",
                self.online_cutoff, self.history_cutoff
            ));
        }
        Ok(())
    }
}

/// Returns "today" normalized to UTC date-only, the single place the engine resolves the
/// current date so that cutoff comparisons never depend on local time zone.
pub fn utc_today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// A monotonic `(date, primary_key)` position marking the boundary of already-processed
/// rows within a single phase. Discarded when the phase ends.
#[derive(Debug, Clone, Default)]
pub struct BatchCursor {
    pub last_date: Option<chrono::NaiveDateTime>,
    pub last_primary_key: Option<String>,
}

impl BatchCursor {
    pub fn is_empty(&self) -> bool {
        self.last_date.is_none()
    }
}

/// Bounds and target for adaptive batch sizing, shared by both phases of a table's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSizeConfig {
    #[serde(default = "default_batch_min")]
    pub min: i64,
    #[serde(default = "default_batch_max")]
    pub max: i64,
    #[serde(default = "default_target_seconds")]
    pub target_seconds: f64,
}

fn default_batch_min() -> i64 {
    100
}
fn default_batch_max() -> i64 {
    2000
}
fn default_target_seconds() -> f64 {
    20.0
}

impl Default for BatchSizeConfig {
    fn default() -> Self {
        Self {
            min: default_batch_min(),
            max: default_batch_max(),
            target_seconds: default_target_seconds(),
        }
    }
}

/// Bounded retry policy applied around one logical operation (a table's Phase 1 or
/// Phase 2 loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

fn default_retry_enabled() -> bool {
    true
}
fn default_max_retry_count() -> u32 {
    3
}
fn default_retry_delay_seconds() -> u64 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_retry_count: default_max_retry_count(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

/// CSV rendering options shared across all tables unless a future per-table override is
/// introduced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_max_rows_per_file")]
    pub max_rows_per_file: usize,
    #[serde(default = "default_file_name_template")]
    pub file_name_template: String,
}

fn default_delimiter() -> char {
    ','
}
fn default_max_rows_per_file() -> usize {
    100_000
}
fn default_file_name_template() -> String {
    "{TableName}_{FromDate:yyyyMMdd}_{ToDate:yyyyMMdd}_Part{PartIndex}.csv".to_string()
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_rows_per_file: default_max_rows_per_file(),
            file_name_template: default_file_name_template(),
        }
    }
}

/// The outcome of one `ArchiveEngine::run_once` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    pub succeeded: bool,
    pub messages: Vec<String>,
}

/// Status recorded against a run or a per-table detail row in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Success,
    PartialFail,
    Fail,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Success => "Success",
            RunStatus::PartialFail => "PartialFail",
            RunStatus::Fail => "Fail",
            RunStatus::Skipped => "Skipped",
        }
    }
}

/// Counters and final status for one setting within one run. One row per setting is
/// written to the audit log regardless of whether the table was processed, skipped, or
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRunDetail {
    pub setting_id: i64,
    pub table_name: String,
    pub source_scanned: i64,
    pub inserted_to_history: i64,
    pub deleted_from_source: i64,
    pub exported_to_csv: i64,
    pub deleted_from_history: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl TableRunDetail {
    pub fn new(setting_id: i64, table_name: impl Into<String>) -> Self {
        Self {
            setting_id,
            table_name: table_name.into(),
            source_scanned: 0,
            inserted_to_history: 0,
            deleted_from_source: 0,
            exported_to_csv: 0,
            deleted_from_history: 0,
            status: RunStatus::Running,
            error_message: None,
        }
    }
}

/// Supplies the enabled/disabled archive contract for every configured table.
///
/// The production implementation reads from the control database (`archive-db`'s
/// `SqlSettingsProvider`); tests typically hold settings in memory instead.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn list_all(&self, cancel: &CancellationToken) -> anyhow::Result<Vec<ArchiveSetting>>;
}

/// Records the lifecycle of a run: a header when the run starts, one detail row per
/// setting as its phases complete, and a final status when the run ends.
///
/// A failure here is logged by the engine at `warn` and never fails or retries the run
/// itself; the audit trail is observability, not a correctness dependency.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn start_run(&self, run_id: uuid::Uuid, host_name: &str) -> anyhow::Result<()>;

    async fn record_table(&self, run_id: uuid::Uuid, detail: &TableRunDetail) -> anyhow::Result<()>;

    async fn finish_run(
        &self,
        run_id: uuid::Uuid,
        status: RunStatus,
        total_tables: i64,
        succeeded_tables: i64,
        failed_tables: i64,
        message: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// No-op `AuditWriter` for callers that don't need auditing (embedding, unit tests).
pub struct NullAuditWriter;

#[async_trait]
impl AuditWriter for NullAuditWriter {
    async fn start_run(&self, _run_id: uuid::Uuid, _host_name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_table(&self, _run_id: uuid::Uuid, _detail: &TableRunDetail) -> anyhow::Result<()> {
        Ok(())
    }

    async fn finish_run(
        &self,
        _run_id: uuid::Uuid,
        _status: RunStatus,
        _total_tables: i64,
        _succeeded_tables: i64,
        _failed_tables: i64,
        _message: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory `SettingsProvider` for tests and for callers that already hold settings.
pub struct StaticSettingsProvider {
    settings: Vec<ArchiveSetting>,
}

impl StaticSettingsProvider {
    pub fn new(settings: Vec<ArchiveSetting>) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn list_all(&self, _cancel: &CancellationToken) -> anyhow::Result<Vec<ArchiveSetting>> {
        Ok(self.settings.clone())
    }
}

/// Top-level run configuration loaded by the CLI from its layered config file plus
/// environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub control_connection_url: String,
    #[serde(default)]
    pub csv: CsvConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub batch_size: BatchSizeConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_validation_rejects_non_ordered_dates() {
        let setting = ArchiveSetting {
            id: 1,
            enabled: true,
            source_connection: "src".into(),
            target_connection: "tgt".into(),
            table_name: "orders".into(),
            date_column: "created_at".into(),
            primary_key_column: "id".into(),
            online_cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            history_cutoff: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            batch_size: 0,
            csv_enabled: false,
            csv_root_folder: None,
            physical_delete_enabled: true,
        };
        let err = setting.validate_cutoffs().unwrap_err();
        assert!(err.contains("online retention must be later than history retention"));
    }

    #[test]
    fn row_preserves_insertion_order() {
        let mut row = Row::new();
        row.insert("b".to_string(), Value::Int(2));
        row.insert("a".to_string(), Value::Int(1));
        let keys: Vec<&str> = row.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn value_display_string_handles_null() {
        assert_eq!(Value::Null.to_display_string(), None);
        assert_eq!(Value::Int(42).to_display_string(), Some("42".to_string()));
    }
}
