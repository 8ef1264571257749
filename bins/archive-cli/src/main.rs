//! # Archive CLI - Data Lifecycle Pipeline Runner
//!
//! Command-line entrypoint for triggering one run of the archive engine. It loads a
//! layered configuration (a config file plus environment variable overrides), wires a
//! SQL-backed settings provider and audit writer against the control database, runs the
//! pipeline once, and reports the outcome.
//!
//! ## Usage
//!
//! ```bash
//! # Run once against the control database named in config.yaml
//! archive-cli --config config.yaml
//!
//! # Override the control connection without editing the file
//! ARCHIVE_CONTROL_CONNECTION_URL=postgres://... archive-cli --config config.yaml
//!
//! # Enable debug logging
//! RUST_LOG=debug archive-cli --config config.yaml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use archive_core::EngineConfig;
use archive_db::{SqlAuditWriter, SqlSettingsProvider};
use archive_engine::ArchiveEngine;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the archive pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "archive-cli")]
#[command(about = "Age-based data lifecycle pipeline runner")]
#[command(long_about = "
archive-cli triggers a single run of the archive engine: it moves rows older than
each table's online cutoff from the source database into the target database, then
optionally exports rows older than the history cutoff to CSV and deletes them from
the target.

Examples:
  archive-cli --config config.yaml
  RUST_LOG=debug archive-cli --config config.yaml
")]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// Values may be overridden with `ARCHIVE_<FIELD>` environment variables, e.g.
    /// `ARCHIVE_CONTROL_CONNECTION_URL`.
    #[arg(short, long)]
    #[arg(help = "Pipeline configuration file")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let engine_config = load_config(&args.config)?;

    let control_pool = archive_db::connect(&engine_config.control_connection_url)
        .await
        .context("connecting to control database")?;

    let settings_provider = Arc::new(SqlSettingsProvider::new(control_pool.clone()));
    let audit_writer = Arc::new(SqlAuditWriter::new(control_pool));

    let engine = ArchiveEngine::new(
        settings_provider,
        audit_writer,
        engine_config.csv,
        engine_config.retry,
        engine_config.batch_size,
    );

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();

    let mut run_handle = tokio::spawn(async move { engine.run_once(&run_cancel).await });

    let outcome = tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::warn!("received Ctrl-C, cancelling run");
            cancel.cancel();
            (&mut run_handle).await.context("run task panicked")?
        }
        result = &mut run_handle => result.context("run task panicked")?,
    };

    for message in &outcome.messages {
        println!("{message}");
    }

    if !outcome.succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: &std::path::Path) -> Result<EngineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()))
        .add_source(config::Environment::with_prefix("ARCHIVE").separator("_"))
        .build()
        .context("loading configuration")?;

    settings
        .try_deserialize::<EngineConfig>()
        .context("parsing configuration")
}
