//! # Archive Engine - Age-Based Data Lifecycle Orchestration
//!
//! This crate provides the orchestrator that drives the archive pipeline: for every
//! enabled table it moves rows from the online (source) database to the historical
//! (target) database, optionally exports older rows to CSV, and optionally deletes what
//! has been safely written downstream.
//!
//! ## Key Components
//!
//! - [`ArchiveEngine`]: iterates enabled settings and drives Phase 1 (move) and
//!   Phase 2 (export) for each.
//! - [`batch_size`]: adaptive batch sizing bounded by `[min, max]`.
//! - [`retry`]: bounded retry with pluggable retryable-failure classification.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archive_core::{CsvConfig, RetryPolicy, BatchSizeConfig, NullAuditWriter, StaticSettingsProvider};
//! use archive_engine::ArchiveEngine;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = ArchiveEngine::new(
//!     Arc::new(StaticSettingsProvider::new(vec![])),
//!     Arc::new(NullAuditWriter),
//!     CsvConfig::default(),
//!     RetryPolicy::default(),
//!     BatchSizeConfig::default(),
//! );
//! let outcome = engine.run_once(&CancellationToken::new()).await;
//! assert!(outcome.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod batch_size;
mod engine;
pub mod retry;

pub use engine::ArchiveEngine;
pub use retry::RetryExecutor;
