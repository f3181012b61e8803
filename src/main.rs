//! loom-sync - bench runner
//!
//! Wires the simulated loom and pedals to an in-memory store and runs the
//! weave orchestrator until CTRL+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loom_sync::config::AppConfig;
use loom_sync::draft_player::DraftPlayer;
use loom_sync::hardware::{LoomDriver, PedalDriver, SimulatedLoom, SimulatedPedals};
use loom_sync::mirror::StateMirror;
use loom_sync::orchestrator::WeaveOrchestrator;
use loom_sync::store::MemoryStore;

/// Loom Sync - mirror loom state and drive the weaving handshake
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// Emit console logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Do not play the configured draft
    #[arg(long)]
    no_draft: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref(), args.log_json)?;

    info!("Starting loom-sync v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load_or_default(&args.config).await?;

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.store.snapshot_path {
        if Path::new(path).exists() {
            store
                .load_snapshot(path)
                .await
                .with_context(|| format!("Failed to restore store snapshot {}", path))?;
            info!("Store restored from {}", path);
        }
    }

    let (loom_tx, loom_rx) = mpsc::channel(64);
    let (pedal_tx, pedal_rx) = mpsc::channel(64);
    let loom = Arc::new(SimulatedLoom::new(config.simulation.clone(), loom_tx));
    let pedals = Arc::new(SimulatedPedals::new(config.simulation.clone(), pedal_tx));

    let (mirror, mirror_rx) = StateMirror::connect(store.clone(), &config.store.namespace).await;
    let orchestrator = WeaveOrchestrator::new(mirror, loom.clone(), pedals.clone());

    loom.init().await.context("Failed to initialize loom")?;
    pedals.init().await.context("Failed to initialize pedals")?;

    let player = if args.no_draft || config.draft.rows.is_empty() {
        None
    } else {
        let player = DraftPlayer::new(store.clone(), &config.store.namespace, &config.draft);
        Some(tokio::spawn(async move {
            if let Err(e) = player.run().await {
                warn!("Draft player stopped: {:#}", e);
            }
        }))
    };

    orchestrator
        .run(
            loom_rx,
            pedal_rx,
            mirror_rx,
            Duration::from_secs(config.keep_alive_secs),
            shutdown_signal(),
        )
        .await;

    if let Some(player) = player {
        player.abort();
    }

    if let Some(path) = &config.store.snapshot_path {
        store
            .save_snapshot(path)
            .await
            .with_context(|| format!("Failed to save store snapshot {}", path))?;
        info!("Store saved to {}", path);
    }

    info!("loom-sync shutdown complete");
    Ok(())
}

fn init_logging(level: &str, log_file: Option<&str>, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Exactly one console layer is set
    let (console, console_json) = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_target(false);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false);
        (Some(layer), None)
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(console_json)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_json_flag() {
        let args = Args::try_parse_from(["loom-sync"]).unwrap();
        assert!(!args.log_json);
        assert_eq!(args.log_level, "info");

        let args = Args::try_parse_from(["loom-sync", "--log-json", "--log-file", "loom.log"]).unwrap();
        assert!(args.log_json);
        assert_eq!(args.log_file.as_deref(), Some("loom.log"));
    }
}
