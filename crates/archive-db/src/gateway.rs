//! Pooled connection access and the idempotent write path described by the engine's
//! filter-then-bulk-load pattern.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use archive_core::{ArchiveError, Row, Value};
use sqlx::any::AnyRow;
use sqlx::AnyPool;
use tokio_util::sync::CancellationToken;

use crate::row_decode::{decode_row, primary_key_string};
use crate::sql_builder;
use crate::MAX_PARAMS_PER_COMMAND;

/// Opens and caches `AnyPool`s by logical connection name or raw connection string, so
/// repeated operations against the same table reuse one pool instead of reconnecting.
pub struct DatabaseGateway {
    pools: RwLock<HashMap<String, Arc<AnyPool>>>,
}

impl DatabaseGateway {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a cached pool for `connection`, opening a new one on first use.
    pub async fn pool(&self, connection: &str) -> anyhow::Result<Arc<AnyPool>> {
        if let Some(pool) = self.pools.read().await.get(connection) {
            return Ok(pool.clone());
        }
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(connection) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(crate::connect(connection).await?);
        pools.insert(connection.to_string(), pool.clone());
        Ok(pool)
    }

    /// Filters `batch` to rows whose primary key is not already present in `table`,
    /// then inserts the remainder one statement at a time via `INSERT ... WHERE NOT
    /// EXISTS`. Returns the number of rows actually inserted.
    pub async fn bulk_load_if_absent(
        &self,
        connection: &str,
        table: &str,
        primary_key_column: &str,
        batch: &[Row],
        cancel: &CancellationToken,
    ) -> Result<i64, ArchiveError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let pool = self
            .pool(connection)
            .await
            .map_err(ArchiveError::Other)?;

        let mut ids = Vec::with_capacity(batch.len());
        for row in batch {
            ids.push(primary_key_string(row, primary_key_column)?);
        }

        let existing = self
            .select_existing_pks(&pool, table, primary_key_column, &ids, cancel)
            .await?;

        let columns: Vec<String> = batch[0].keys().cloned().collect();
        let insert_sql = sql_builder::build_insert_if_absent(table, &columns, primary_key_column)?;

        let mut inserted = 0i64;
        for (row, id) in batch.iter().zip(ids.iter()) {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            if existing.contains(id) {
                continue;
            }
            let mut query = sqlx::query(&insert_sql);
            for column in &columns {
                query = bind_value(query, row.get(column).unwrap_or(&Value::Null));
            }
            query = bind_value(query, row.get(primary_key_column).unwrap_or(&Value::Null));
            let result = query
                .execute(pool.as_ref())
                .await
                .map_err(|e| ArchiveError::TransientDatabase(e.to_string()))?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }

    async fn select_existing_pks(
        &self,
        pool: &AnyPool,
        table: &str,
        primary_key_column: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<std::collections::HashSet<String>, ArchiveError> {
        let mut existing = std::collections::HashSet::new();
        for chunk in ids.chunks(MAX_PARAMS_PER_COMMAND) {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let sql = sql_builder::build_select_existing_pks(table, primary_key_column, chunk.len())?;
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.clone());
            }
            let rows: Vec<AnyRow> = query
                .fetch_all(pool)
                .await
                .map_err(|e| ArchiveError::TransientDatabase(e.to_string()))?;
            for row in rows {
                let decoded = decode_row(&row)?;
                if let Some(value) = decoded.values().next() {
                    if let Some(s) = value.to_display_string() {
                        existing.insert(s);
                    }
                }
            }
        }
        Ok(existing)
    }

    /// Deletes every row in `table` whose primary key is in `ids`, chunked at
    /// [`crate::MAX_PARAMS_PER_COMMAND`]. Returns the total number of rows deleted.
    pub async fn delete_by_ids(
        &self,
        connection: &str,
        table: &str,
        primary_key_column: &str,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<i64, ArchiveError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let pool = self
            .pool(connection)
            .await
            .map_err(ArchiveError::Other)?;

        let mut deleted = 0i64;
        for chunk in ids.chunks(MAX_PARAMS_PER_COMMAND) {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let sql = sql_builder::build_delete_in(table, primary_key_column, chunk.len())?;
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.clone());
            }
            let result = query
                .execute(pool.as_ref())
                .await
                .map_err(|e| ArchiveError::TransientDatabase(e.to_string()))?;
            deleted += result.rows_affected() as i64;
        }
        Ok(deleted)
    }
}

impl Default for DatabaseGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Date(d) => query.bind(*d),
        Value::DateTime(dt) => query.bind(*dt),
    }
}
