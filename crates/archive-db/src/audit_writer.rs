//! `SqlAuditWriter`: records the run/detail audit tables described in the external
//! interface contract.

use archive_core::{AuditWriter, RunStatus, TableRunDetail};
use async_trait::async_trait;
use sqlx::AnyPool;

pub struct SqlAuditWriter {
    pool: AnyPool,
}

impl SqlAuditWriter {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditWriter for SqlAuditWriter {
    async fn start_run(&self, run_id: uuid::Uuid, host_name: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO \"ArchiveRuns\" (\"jobRunId\", \"startedAt\", \"status\", \"hostName\") VALUES (?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(chrono::Utc::now())
        .bind(RunStatus::Running.as_str())
        .bind(host_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_table(&self, run_id: uuid::Uuid, detail: &TableRunDetail) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO \"ArchiveRunDetails\" (\"jobRunId\", \"settingId\", \"tableName\", \
             \"sourceScanned\", \"insertedToHistory\", \"deletedFromSource\", \"exportedToCsv\", \
             \"deletedFromHistory\", \"status\", \"errorMessage\") \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(detail.setting_id)
        .bind(&detail.table_name)
        .bind(detail.source_scanned)
        .bind(detail.inserted_to_history)
        .bind(detail.deleted_from_source)
        .bind(detail.exported_to_csv)
        .bind(detail.deleted_from_history)
        .bind(detail.status.as_str())
        .bind(detail.error_message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: uuid::Uuid,
        status: RunStatus,
        total_tables: i64,
        succeeded_tables: i64,
        failed_tables: i64,
        message: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE \"ArchiveRuns\" SET \"endedAt\" = ?, \"status\" = ?, \"totalTables\" = ?, \
             \"succeededTables\" = ?, \"failedTables\" = ?, \"message\" = ? WHERE \"jobRunId\" = ?",
        )
        .bind(chrono::Utc::now())
        .bind(status.as_str())
        .bind(total_tables)
        .bind(succeeded_tables)
        .bind(failed_tables)
        .bind(message)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
