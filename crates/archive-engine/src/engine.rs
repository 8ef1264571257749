//! `ArchiveEngine`: the orchestrator driving Phase 1 (move) and Phase 2 (export) for
//! every enabled table.

use std::sync::Arc;
use std::time::Instant;

use archive_core::{
    utc_today, ArchiveError, ArchiveSetting, AuditWriter, BatchCursor, BatchSizeConfig, CsvConfig,
    RetryPolicy, Row, RunOutcome, RunStatus, SettingsProvider, TableRunDetail,
};
use archive_db::cursor_reader::{advance_cursor, CursorBatchReader};
use archive_db::gateway::DatabaseGateway;
use tokio_util::sync::CancellationToken;

use crate::batch_size;
use crate::retry::RetryExecutor;

/// Default batch size used when a setting's `batch_size` is non-positive.
const DEFAULT_BATCH_SIZE: i64 = 1000;

pub struct ArchiveEngine {
    settings_provider: Arc<dyn SettingsProvider>,
    audit_writer: Arc<dyn AuditWriter>,
    gateway: DatabaseGateway,
    csv_config: CsvConfig,
    retry_policy: RetryPolicy,
    batch_size_config: BatchSizeConfig,
}

impl ArchiveEngine {
    pub fn new(
        settings_provider: Arc<dyn SettingsProvider>,
        audit_writer: Arc<dyn AuditWriter>,
        csv_config: CsvConfig,
        retry_policy: RetryPolicy,
        batch_size_config: BatchSizeConfig,
    ) -> Self {
        Self {
            settings_provider,
            audit_writer,
            gateway: DatabaseGateway::new(),
            csv_config,
            retry_policy,
            batch_size_config,
        }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> RunOutcome {
        let run_id = uuid::Uuid::new_v4();
        let host_name = hostname();

        let settings = match self.settings_provider.list_all(cancel).await {
            Ok(s) => s,
            Err(e) => {
                return RunOutcome {
                    succeeded: false,
                    messages: vec![format!("run failed: {e}")],
                }
            }
        };

        let enabled: Vec<ArchiveSetting> = settings.into_iter().filter(|s| s.enabled).collect();

        if enabled.is_empty() {
            self.audit_no_op(run_id, &host_name, RunStatus::Skipped).await;
            return RunOutcome {
                succeeded: true,
                messages: vec!["no enabled settings".to_string()],
            };
        }

        if let Err(e) = self.audit_writer.start_run(run_id, &host_name).await {
            tracing::warn!(error = %e, "failed to write run header to audit log");
        }

        let mut messages = Vec::new();
        let mut succeeded_tables = 0i64;
        let mut failed_tables = 0i64;
        let total_tables = enabled.len() as i64;

        for setting in &enabled {
            if cancel.is_cancelled() {
                messages.push("run cancelled".to_string());
                self.finish_run(run_id, RunStatus::Fail, total_tables, succeeded_tables, failed_tables, &messages)
                    .await;
                return RunOutcome { succeeded: false, messages };
            }

            let mut detail = TableRunDetail::new(setting.id, &setting.table_name);

            if let Err(validation_message) = setting.validate_cutoffs() {
                tracing::warn!(table = %setting.table_name, reason = %validation_message, "skipping setting");
                messages.push(format!("[{}] skipped: {validation_message}", setting.table_name));
                detail.status = RunStatus::Skipped;
                detail.error_message = Some(validation_message);
                self.record_detail(run_id, &detail).await;
                continue;
            }

            match self.run_table(setting, &mut detail, cancel).await {
                Ok(msg) => {
                    messages.push(msg);
                    detail.status = RunStatus::Success;
                    succeeded_tables += 1;
                    self.record_detail(run_id, &detail).await;
                }
                Err(e) => {
                    let msg = format!("[{}] error: {e}", setting.table_name);
                    messages.push(msg);
                    detail.status = RunStatus::Fail;
                    detail.error_message = Some(e.to_string());
                    failed_tables += 1;
                    self.record_detail(run_id, &detail).await;
                    self.finish_run(run_id, RunStatus::Fail, total_tables, succeeded_tables, failed_tables, &messages)
                        .await;
                    return RunOutcome { succeeded: false, messages };
                }
            }
        }

        self.finish_run(run_id, RunStatus::Success, total_tables, succeeded_tables, failed_tables, &messages)
            .await;
        RunOutcome { succeeded: true, messages }
    }

    async fn run_table(
        &self,
        setting: &ArchiveSetting,
        detail: &mut TableRunDetail,
        cancel: &CancellationToken,
    ) -> Result<String, ArchiveError> {
        let (inserted, deleted_source, scanned) = RetryExecutor::execute(
            &format!("{}-Archive", setting.table_name),
            &self.retry_policy,
            cancel,
            || self.run_phase1(setting, cancel),
        )
        .await?;
        detail.inserted_to_history = inserted;
        detail.deleted_from_source = deleted_source;
        detail.source_scanned = scanned;

        let mut exported = 0;
        let mut deleted_history = 0;
        if setting.csv_enabled {
            let (e, d) = RetryExecutor::execute(
                &format!("{}-Csv", setting.table_name),
                &self.retry_policy,
                cancel,
                || self.run_phase2(setting, cancel),
            )
            .await?;
            exported = e;
            deleted_history = d;
        }
        detail.exported_to_csv = exported;
        detail.deleted_from_history = deleted_history;

        Ok(format!(
            "{} moved (online>{}; history>{})",
            setting.table_name, setting.online_cutoff, setting.history_cutoff
        ))
    }

    /// Phase 1: move rows older than `online_cutoff` from source to target.
    /// Returns `(inserted_to_history, deleted_from_source, source_scanned)`.
    async fn run_phase1(
        &self,
        setting: &ArchiveSetting,
        cancel: &CancellationToken,
    ) -> Result<(i64, i64, i64), ArchiveError> {
        let reader = CursorBatchReader::new(&self.gateway);
        let mut cursor = BatchCursor::default();
        let mut size = initial_batch_size(setting.batch_size);
        let mut total_inserted = 0i64;
        let mut total_deleted = 0i64;
        let mut total_scanned = 0i64;

        loop {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let batch = reader
                .next(
                    &setting.source_connection,
                    &setting.table_name,
                    &setting.date_column,
                    &setting.primary_key_column,
                    setting.online_cutoff,
                    size,
                    &cursor,
                    cancel,
                )
                .await?;

            if batch.is_empty() {
                break;
            }

            let started = Instant::now();
            total_scanned += batch.len() as i64;

            let inserted = self
                .gateway
                .bulk_load_if_absent(
                    &setting.target_connection,
                    &setting.table_name,
                    &setting.primary_key_column,
                    &batch,
                    cancel,
                )
                .await?;
            total_inserted += inserted;

            if setting.physical_delete_enabled {
                let ids = batch_primary_keys(&batch, &setting.primary_key_column)?;
                let deleted = self
                    .gateway
                    .delete_by_ids(
                        &setting.source_connection,
                        &setting.table_name,
                        &setting.primary_key_column,
                        &ids,
                        cancel,
                    )
                    .await?;
                total_deleted += deleted;
            }

            let elapsed = started.elapsed();
            let row_count = batch.len() as i64;
            cursor = advance_cursor(&batch, &setting.date_column, &setting.primary_key_column)?;
            size = batch_size::adjust(size, row_count, elapsed, &self.batch_size_config);
        }

        Ok((total_inserted, total_deleted, total_scanned))
    }

    /// Phase 2: export rows older than `history_cutoff` from target to CSV, then delete
    /// them from target. Returns `(exported_to_csv, deleted_from_history)`.
    async fn run_phase2(
        &self,
        setting: &ArchiveSetting,
        cancel: &CancellationToken,
    ) -> Result<(i64, i64), ArchiveError> {
        let root_folder = setting.csv_root_folder.as_deref().ok_or_else(|| {
            ArchiveError::Configuration(format!(
                "csv_enabled is true for '{}' but csv_root_folder is unset",
                setting.table_name
            ))
        })?;

        let reader = CursorBatchReader::new(&self.gateway);
        let mut cursor = BatchCursor::default();
        let mut size = initial_batch_size(setting.batch_size);
        let mut total_exported = 0i64;
        let mut total_deleted = 0i64;

        loop {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let batch = reader
                .next(
                    &setting.target_connection,
                    &setting.table_name,
                    &setting.date_column,
                    &setting.primary_key_column,
                    setting.history_cutoff,
                    size,
                    &cursor,
                    cancel,
                )
                .await?;

            if batch.is_empty() {
                break;
            }

            let started = Instant::now();

            let (from_date, to_date) = date_bounds(&batch, &setting.date_column)?;
            let columns: Vec<String> = batch[0].keys().cloned().collect();
            let written = archive_csv::write_parts(
                &self.csv_config,
                root_folder,
                &setting.table_name,
                from_date,
                to_date,
                &columns,
                &batch,
                cancel,
            )?;
            if !written.is_empty() {
                total_exported += batch.len() as i64;
            }

            let ids = batch_primary_keys(&batch, &setting.primary_key_column)?;
            let deleted = self
                .gateway
                .delete_by_ids(
                    &setting.target_connection,
                    &setting.table_name,
                    &setting.primary_key_column,
                    &ids,
                    cancel,
                )
                .await?;
            total_deleted += deleted;

            let elapsed = started.elapsed();
            let row_count = batch.len() as i64;
            cursor = advance_cursor(&batch, &setting.date_column, &setting.primary_key_column)?;
            size = batch_size::adjust(size, row_count, elapsed, &self.batch_size_config);
        }

        Ok((total_exported, total_deleted))
    }

    async fn audit_no_op(&self, run_id: uuid::Uuid, host_name: &str, status: RunStatus) {
        if let Err(e) = self.audit_writer.start_run(run_id, host_name).await {
            tracing::warn!(error = %e, "failed to write run header to audit log");
        }
        if let Err(e) = self
            .audit_writer
            .finish_run(run_id, status, 0, 0, 0, Some("no enabled settings"))
            .await
        {
            tracing::warn!(error = %e, "failed to finalize audit log run");
        }
    }

    async fn record_detail(&self, run_id: uuid::Uuid, detail: &TableRunDetail) {
        if let Err(e) = self.audit_writer.record_table(run_id, detail).await {
            tracing::warn!(table = %detail.table_name, error = %e, "failed to record table detail in audit log");
        }
    }

    async fn finish_run(
        &self,
        run_id: uuid::Uuid,
        status: RunStatus,
        total_tables: i64,
        succeeded_tables: i64,
        failed_tables: i64,
        messages: &[String],
    ) {
        let message = messages.last().cloned();
        if let Err(e) = self
            .audit_writer
            .finish_run(run_id, status, total_tables, succeeded_tables, failed_tables, message.as_deref())
            .await
        {
            tracing::warn!(error = %e, "failed to finalize audit log run");
        }
    }
}

fn initial_batch_size(configured: i64) -> i64 {
    if configured > 0 {
        configured
    } else {
        DEFAULT_BATCH_SIZE
    }
}

fn batch_primary_keys(batch: &[Row], primary_key_column: &str) -> Result<Vec<String>, ArchiveError> {
    batch
        .iter()
        .map(|row| archive_db::row_decode::primary_key_string(row, primary_key_column))
        .collect()
}

fn date_bounds(batch: &[Row], date_column: &str) -> Result<(chrono::NaiveDate, chrono::NaiveDate), ArchiveError> {
    let mut min_date = None;
    let mut max_date = None;
    for row in batch {
        let value = row.get(date_column).ok_or_else(|| {
            ArchiveError::Configuration(format!("row missing date column '{date_column}'"))
        })?;
        let date = match value {
            archive_core::Value::Date(d) => *d,
            archive_core::Value::DateTime(dt) => dt.naive_utc().date(),
            other => {
                return Err(ArchiveError::Configuration(format!(
                    "date column '{date_column}' is not a date/datetime value: {other:?}"
                )))
            }
        };
        min_date = Some(min_date.map_or(date, |m: chrono::NaiveDate| m.min(date)));
        max_date = Some(max_date.map_or(date, |m: chrono::NaiveDate| m.max(date)));
    }
    let min_date = min_date.unwrap_or_else(utc_today);
    let max_date = max_date.unwrap_or_else(utc_today);
    Ok((min_date, max_date))
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::{AuditWriter, NullAuditWriter, StaticSettingsProvider};
    use archive_db::SqlAuditWriter;
    use chrono::NaiveDate;
    use sqlx::any::{install_default_drivers, AnyPoolOptions};
    use sqlx::{AnyPool, Row as _};

    /// Mirrors the corpus's own `sqlite::memory:`-backed test pool, but against a
    /// tempdir-backed file instead: `ArchiveEngine` drives its source, target, and
    /// control connections through independently pooled `sqlx::AnyPool`s (each with up
    /// to 10 connections), and a true `:memory:` database is private per connection, so
    /// only a real file on disk keeps every pooled connection looking at the same data.
    async fn sqlite_pool(path: &std::path::Path) -> AnyPool {
        install_default_drivers();
        AnyPoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .expect("failed to open sqlite pool")
    }

    fn sqlite_url(path: &std::path::Path) -> String {
        format!("sqlite://{}?mode=rwc", path.display())
    }

    async fn create_orders_table(pool: &AnyPool) {
        sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, created_at TEXT NOT NULL, note TEXT)")
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_orders(pool: &AnyPool, rows: &[(i64, NaiveDate, &str)]) {
        for (id, date, note) in rows {
            sqlx::query("INSERT INTO orders (id, created_at, note) VALUES (?, ?, ?)")
                .bind(*id)
                .bind(*date)
                .bind(*note)
                .execute(pool)
                .await
                .unwrap();
        }
    }

    async fn count_rows(pool: &AnyPool, table: &str) -> i64 {
        let row = sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap();
        row.try_get::<i64, _>(0).unwrap()
    }

    async fn create_audit_tables(pool: &AnyPool) {
        sqlx::query(
            "CREATE TABLE \"ArchiveRuns\" (\"jobRunId\" TEXT PRIMARY KEY, \"startedAt\" TEXT, \
             \"status\" TEXT, \"hostName\" TEXT, \"endedAt\" TEXT, \"totalTables\" INTEGER, \
             \"succeededTables\" INTEGER, \"failedTables\" INTEGER, \"message\" TEXT)",
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE \"ArchiveRunDetails\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"jobRunId\" TEXT, \"settingId\" INTEGER, \"tableName\" TEXT, \"sourceScanned\" INTEGER, \
             \"insertedToHistory\" INTEGER, \"deletedFromSource\" INTEGER, \"exportedToCsv\" INTEGER, \
             \"deletedFromHistory\" INTEGER, \"status\" TEXT, \"errorMessage\" TEXT)",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    fn basic_setting(source_url: &str, target_url: &str) -> ArchiveSetting {
        ArchiveSetting {
            id: 1,
            enabled: true,
            source_connection: source_url.to_string(),
            target_connection: target_url.to_string(),
            table_name: "orders".to_string(),
            date_column: "created_at".to_string(),
            primary_key_column: "id".to_string(),
            online_cutoff: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            history_cutoff: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            batch_size: 2,
            csv_enabled: false,
            csv_root_folder: None,
            physical_delete_enabled: true,
        }
    }

    fn engine_for(settings: Vec<ArchiveSetting>, audit_writer: Arc<dyn AuditWriter>) -> ArchiveEngine {
        ArchiveEngine::new(
            Arc::new(StaticSettingsProvider::new(settings)),
            audit_writer,
            CsvConfig::default(),
            RetryPolicy::default(),
            BatchSizeConfig::default(),
        )
    }

    #[tokio::test]
    async fn s1_basic_move_archives_rows_older_than_online_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");
        let target_path = dir.path().join("target.db");
        let source_pool = sqlite_pool(&source_path).await;
        let target_pool = sqlite_pool(&target_path).await;
        create_orders_table(&source_pool).await;
        create_orders_table(&target_pool).await;
        seed_orders(
            &source_pool,
            &[
                (1, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "a"),
                (2, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "b"),
                (3, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), "c"),
            ],
        )
        .await;

        let setting = basic_setting(&sqlite_url(&source_path), &sqlite_url(&target_path));
        let engine = engine_for(vec![setting], Arc::new(NullAuditWriter));

        let outcome = engine.run_once(&CancellationToken::new()).await;

        assert!(outcome.succeeded);
        assert_eq!(
            outcome.messages,
            vec!["orders moved (online>2025-01-01; history>2023-01-01)".to_string()]
        );
        assert_eq!(count_rows(&target_pool, "orders").await, 2);
        assert_eq!(count_rows(&source_pool, "orders").await, 1);
    }

    #[tokio::test]
    async fn s2_idempotent_rerun_does_not_duplicate_or_error() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");
        let target_path = dir.path().join("target.db");
        let source_pool = sqlite_pool(&source_path).await;
        let target_pool = sqlite_pool(&target_path).await;
        create_orders_table(&source_pool).await;
        create_orders_table(&target_pool).await;
        seed_orders(
            &source_pool,
            &[
                (1, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "a"),
                (2, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "b"),
                (3, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), "c"),
            ],
        )
        .await;

        let setting = basic_setting(&sqlite_url(&source_path), &sqlite_url(&target_path));
        let engine = engine_for(vec![setting.clone()], Arc::new(NullAuditWriter));
        let first = engine.run_once(&CancellationToken::new()).await;
        assert!(first.succeeded);

        let engine = engine_for(vec![setting], Arc::new(NullAuditWriter));
        let second = engine.run_once(&CancellationToken::new()).await;

        assert!(second.succeeded);
        assert_eq!(count_rows(&target_pool, "orders").await, 2);
        assert_eq!(count_rows(&source_pool, "orders").await, 1);
    }

    #[tokio::test]
    async fn s5_cutoff_misconfiguration_skips_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");
        let target_path = dir.path().join("target.db");
        let source_pool = sqlite_pool(&source_path).await;
        let target_pool = sqlite_pool(&target_path).await;
        create_orders_table(&source_pool).await;
        create_orders_table(&target_pool).await;
        seed_orders(
            &source_pool,
            &[
                (1, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "a"),
                (2, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "b"),
            ],
        )
        .await;

        let mut bad_setting = basic_setting(&sqlite_url(&source_path), &sqlite_url(&target_path));
        bad_setting.id = 1;
        bad_setting.online_cutoff = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        bad_setting.history_cutoff = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let mut good_setting = basic_setting(&sqlite_url(&source_path), &sqlite_url(&target_path));
        good_setting.id = 2;

        let engine = engine_for(vec![bad_setting, good_setting], Arc::new(NullAuditWriter));
        let outcome = engine.run_once(&CancellationToken::new()).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.messages.len(), 2);
        assert!(outcome.messages[0].contains("skipped"));
        assert!(outcome.messages[0].contains("online retention must be later than history retention"));
        assert_eq!(
            outcome.messages[1],
            "orders moved (online>2025-01-01; history>2023-01-01)"
        );
        assert_eq!(count_rows(&target_pool, "orders").await, 2);
    }

    #[tokio::test]
    async fn s7_audit_writer_records_run_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");
        let target_path = dir.path().join("target.db");
        let control_path = dir.path().join("control.db");
        let source_pool = sqlite_pool(&source_path).await;
        let target_pool = sqlite_pool(&target_path).await;
        let control_pool = sqlite_pool(&control_path).await;
        create_orders_table(&source_pool).await;
        create_orders_table(&target_pool).await;
        create_audit_tables(&control_pool).await;
        seed_orders(
            &source_pool,
            &[
                (1, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "a"),
                (2, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "b"),
            ],
        )
        .await;

        let setting = basic_setting(&sqlite_url(&source_path), &sqlite_url(&target_path));
        let audit_writer = Arc::new(SqlAuditWriter::new(control_pool.clone()));
        let engine = engine_for(vec![setting], audit_writer);

        let outcome = engine.run_once(&CancellationToken::new()).await;
        assert!(outcome.succeeded);

        let run_row = sqlx::query("SELECT \"status\" FROM \"ArchiveRuns\"")
            .fetch_one(&control_pool)
            .await
            .unwrap();
        assert_eq!(run_row.try_get::<String, _>(0).unwrap(), "Success");

        assert_eq!(count_rows(&control_pool, "\"ArchiveRunDetails\"").await, 1);

        let detail_row = sqlx::query(
            "SELECT \"status\", \"sourceScanned\", \"insertedToHistory\" FROM \"ArchiveRunDetails\"",
        )
        .fetch_one(&control_pool)
        .await
        .unwrap();
        assert_eq!(detail_row.try_get::<String, _>(0).unwrap(), "Success");
        assert_eq!(detail_row.try_get::<i64, _>(1).unwrap(), 2);
        assert_eq!(detail_row.try_get::<i64, _>(2).unwrap(), 2);
    }
}
