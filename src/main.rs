//! sparkstore Binary Entry Point
//!
//! Replays a capture of transport deliveries into the store. Each input line
//! is one delivery: `{"topic": "spBv1.0/...", "payload": {...}}`.
//! Core functionality is provided by the `sparkstore` library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use sparkstore::config::parse_duration;
use sparkstore::{AppConfig, Ingestor, LoggingRebirthSink, NamespacePolicy, StorageBuilder};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sparkstore - Sparkplug-style telemetry ingestion
#[derive(Parser, Debug)]
#[command(name = "sparkstore", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when absent)
    #[arg(short, long, env = "SPARKSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides config file)
    #[arg(long, env = "SPARKSTORE_DB_PATH")]
    db_path: Option<String>,

    /// Bound on a single storage call, e.g. "500ms" or "5s" (overrides config file)
    #[arg(long, env = "SPARKSTORE_STATEMENT_TIMEOUT", value_parser = parse_duration)]
    statement_timeout: Option<Duration>,

    /// Capture to replay, one JSON delivery per line (stdin when absent)
    #[arg(short, long, env = "SPARKSTORE_INPUT")]
    input: Option<PathBuf>,
}

/// One captured delivery.
#[derive(Debug, Deserialize)]
struct CapturedDelivery {
    topic: String,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct ReplaySummary {
    lines: u64,
    invalid_lines: u64,
    undecodable: u64,
    ingested: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sparkstore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sparkstore - Sparkplug-style telemetry ingestion");

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(path) = cli.db_path {
        config = config.with_db_path(path);
        config.validate()?;
    }
    if let Some(timeout) = cli.statement_timeout {
        config = config.with_statement_timeout(timeout);
        config.validate()?;
    }

    let storage = StorageBuilder::new(config.db_path())
        .pool_size(config.database.pool_size)
        .statement_timeout(config.database.statement_timeout)
        .build()
        .inspect_err(|e| tracing::error!("Failed to initialize storage: {}", e))?;

    let ingestor = Ingestor::from_storage(
        &storage,
        Arc::new(LoggingRebirthSink),
        NamespacePolicy::from_config(&config.ingest),
    );

    let summary = match &cli.input {
        Some(path) => {
            tracing::info!("Replaying deliveries from: {}", path.display());
            let file = tokio::fs::File::open(path).await?;
            replay_until_shutdown(&ingestor, BufReader::new(file)).await?
        }
        None => {
            tracing::info!("Replaying deliveries from stdin");
            replay_until_shutdown(&ingestor, BufReader::new(tokio::io::stdin())).await?
        }
    };

    let stats = ingestor.stats().snapshot();
    tracing::info!(
        lines = summary.lines,
        invalid_lines = summary.invalid_lines,
        undecodable = summary.undecodable,
        ingested = summary.ingested,
        "Replay complete"
    );
    tracing::info!(
        "Stats: {}",
        serde_json::to_string(&stats).unwrap_or_else(|_| format!("{stats:?}"))
    );

    let relations = storage.reader.relations().await?;
    tracing::info!("{} relations in store: {}", relations.len(), relations.join(", "));

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Replay until input ends or Ctrl+C arrives.
async fn replay_until_shutdown<R>(
    ingestor: &Ingestor,
    reader: R,
) -> Result<ReplaySummary, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ReplaySummary::default();
    tokio::select! {
        result = replay(ingestor, reader, &mut summary) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal, stopping replay");
        }
    }
    Ok(summary)
}

async fn replay<R>(
    ingestor: &Ingestor,
    reader: R,
    summary: &mut ReplaySummary,
) -> Result<(), std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        summary.lines += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let captured: CapturedDelivery = match serde_json::from_str(line) {
            Ok(captured) => captured,
            Err(e) => {
                summary.invalid_lines += 1;
                tracing::warn!(line = summary.lines, error = %e, "Skipping invalid capture line");
                continue;
            }
        };

        let payload = serde_json::to_vec(&captured.payload)?;
        if ingestor.ingest_raw(&captured.topic, &payload).await.is_err() {
            summary.undecodable += 1;
            continue;
        }
        summary.ingested += 1;
    }
    Ok(())
}
