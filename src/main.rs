//! Poolwatch CLI entry point.
//!
//! Provides `start` to run the watcher daemon and `check` to scan an existing
//! access log once without sending alerts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use poolwatch::config::load_config;
use poolwatch::logging;
use poolwatch::watcher::{scan_file, Watcher};

/// Poolwatch: blue/green failover and error-rate watcher.
#[derive(Parser)]
#[command(name = "poolwatch", version, about)]
struct Cli {
    /// Optional TOML config file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Tail the access log and send alerts until interrupted.
    Start,
    /// Scan an access log from the beginning and report anomalies (dry run).
    Check {
        /// Log file to scan. Defaults to the configured log path.
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start(cli.config).await,
        Command::Check { file } => handle_check(cli.config, file),
    }
}

/// Run the watcher until Ctrl-C or SIGTERM.
async fn handle_start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref())?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level)?;
            None
        }
    };

    info!(
        path = %config.source.path.display(),
        threshold = config.detection.error_threshold,
        window = config.detection.window_size,
        cooldown_secs = config.alerts.cooldown_secs,
        maintenance_mode = config.alerts.maintenance_mode,
        active_pool = %config.alerts.active_pool,
        "starting blue/green log watcher"
    );

    let watcher = Watcher::from_config(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(watcher.run(shutdown_rx));

    shutdown_signal().await;
    info!("received shutdown signal");
    if shutdown_tx.send(true).is_err() {
        warn!("watcher already stopped");
    }

    task.await.context("watcher task panicked")?;
    Ok(())
}

/// Scan a log file once and print the anomalies found.
fn handle_check(config_path: Option<PathBuf>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref())?;
    logging::init_cli(&config.logging.level)?;
    let path = file.unwrap_or_else(|| config.source.path.clone());

    let summary = scan_file(&path, config.detector())
        .with_context(|| format!("failed to scan {}", path.display()))?;

    for event in &summary.events {
        info!(event = ?event, "anomaly detected");
    }

    info!(
        path = %path.display(),
        lines = summary.lines,
        records = summary.records,
        anomalies = summary.events.len(),
        "scan complete"
    );

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
