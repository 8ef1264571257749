//! # Archive DB - Dialect-Neutral Database Access
//!
//! Concrete database collaborators for the archive engine, built on `sqlx::Any` so a
//! single code path targets Postgres, MySQL, and SQLite without per-driver branches.
//!
//! ## Modules
//!
//! - [`sql_builder`]: identifier quoting and statement generation.
//! - [`gateway`]: pooled connection access, bulk insert-if-absent, chunked delete.
//! - [`row_decode`]: generic `AnyRow` to [`archive_core::Row`] decoding.
//! - [`cursor_reader`]: the batched, cursor-advancing table reader.
//! - [`settings_provider`]: `SqlSettingsProvider`, reading `ArchiveSettings`.
//! - [`audit_writer`]: `SqlAuditWriter`, writing the run/detail audit tables.

pub mod audit_writer;
pub mod cursor_reader;
pub mod gateway;
pub mod row_decode;
pub mod settings_provider;
pub mod sql_builder;

pub use audit_writer::SqlAuditWriter;
pub use cursor_reader::CursorBatchReader;
pub use gateway::DatabaseGateway;
pub use settings_provider::SqlSettingsProvider;

/// Maximum number of bound parameters placed in a single `IN (...)` clause. Chosen well
/// under the tightest dialect limit (SQL Server's 2100) to leave headroom for other
/// parameters in the same statement.
pub const MAX_PARAMS_PER_COMMAND: usize = 1000;

/// Opens a `sqlx::AnyPool` for a connection string, installing the driver set once per
/// process as `sqlx::any` requires.
pub async fn connect(url: &str) -> anyhow::Result<sqlx::AnyPool> {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await?;
    Ok(pool)
}
