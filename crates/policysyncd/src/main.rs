//! policysyncd entry point.
//!
//! Loads configuration, initialises logging and runs the daemon with the
//! dry-run synchronizer until Ctrl-C. With `--replay` the daemon applies the
//! recorded event batches and exits once their syncs have landed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use policysyncd::audit::{init_logging, init_logging_pretty};
use policysyncd::config::{LogFormat, DEFAULT_CONFIG_PATH};
use policysyncd::daemon::load_replay;
use policysyncd::{DryRunSynchronizer, PolicySyncConfig, PolicySyncDaemon};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Group-based policy to device synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "policysyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Human-readable log output
    #[arg(long)]
    pretty: bool,

    /// JSON file of event batches to apply at startup
    #[arg(short = 'r', long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("policysyncd failed: {:#}", e);
            eprintln!("policysyncd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = PolicySyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.pretty {
        config.logging.format = LogFormat::Pretty;
    }
    config.validate()?;

    match config.logging.format {
        LogFormat::Json => init_logging(&config.logging.level),
        LogFormat::Pretty => init_logging_pretty(&config.logging.level),
    }

    info!("Starting policysyncd {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", args.config.display());
    info!(
        "Coalescer: max_in_flight={} shutdown_timeout={}ms",
        config.coalescer.max_in_flight, config.coalescer.shutdown_timeout_ms
    );

    let replay = match &args.replay {
        Some(path) => {
            let batches = load_replay(path)?;
            info!("Loaded {} replay batches from {}", batches.len(), path.display());
            Some(batches)
        }
        None => None,
    };

    let daemon = Arc::new(PolicySyncDaemon::new(
        &config,
        Arc::new(DryRunSynchronizer::new()),
    )?);
    let (tx, rx) = mpsc::channel(config.daemon.event_queue_depth);
    let shutdown = CancellationToken::new();

    let runner = {
        let daemon = Arc::clone(&daemon);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { daemon.run(rx, shutdown).await })
    };

    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Received SIGINT, shutting down gracefully...");
                    shutdown.cancel();
                }
                Err(err) => error!("Failed to listen for ctrl-c: {}", err),
            }
        })
    };

    // Without a replay the sender stays open until shutdown.
    let _idle_sender = match replay {
        Some(batches) => {
            for batch in batches {
                if tx.send(batch).await.is_err() {
                    warn!("Daemon stopped before replay finished");
                    break;
                }
            }
            drop(tx);
            None
        }
        None => Some(tx),
    };

    let outcome = runner.await.context("daemon task failed")?;
    signal.abort();

    let stats = daemon.stats();
    info!(
        "policysyncd stopped ({:?}): {} batches, {} policies submitted, {} applied, {} failed",
        outcome,
        stats.batches,
        stats.policies_submitted,
        stats.coalescer.applied,
        stats.coalescer.failed
    );
    Ok(())
}
