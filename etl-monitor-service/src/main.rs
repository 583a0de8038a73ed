//! ETL Monitor Service
//!
//! Loads the executions stored in the working directory and keeps them
//! reconciled with the snapshots runners write:
//! - Periodic reconciliation loop
//! - Tombstone purge and directory garbage collection
//! - Lifecycle events logged as they happen

use anyhow::{Context, Result};
use clap::Parser;
use etl_monitor::{
    BroadcastListener, ExecutionEvent, ExecutionRegistry, FsRemover, MonitorConfig,
    ReconciliationLoop,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "etl-monitor-service")]
#[command(about = "Tracks pipeline executions and garbage-collects deleted ones")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the executions
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Seconds a deleted execution stays visible
    #[arg(long)]
    tombstone_ttl_secs: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print all executions as JSON and exit
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("etl_monitor_service=info".parse()?)
                .add_directive("etl_monitor=info".parse()?)
                .add_directive("etl_core=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = MonitorConfig::load(args.config.as_deref()).context("Can't load configuration")?;
    if let Some(working_dir) = args.working_dir {
        config.working_directory = working_dir;
    }
    if let Some(interval) = args.interval_secs {
        config = config.with_reconcile_interval(Duration::from_secs(interval));
    }
    if let Some(ttl) = args.tombstone_ttl_secs {
        config = config.with_tombstone_ttl(Duration::from_secs(ttl));
    }
    let interval = config.reconcile_interval();

    let listener = BroadcastListener::default();
    let events = listener.subscribe();
    let registry = Arc::new(ExecutionRegistry::new(
        config,
        Arc::new(listener),
        Arc::new(FsRemover),
    )?);
    let loaded = registry.load_all().await?;

    if let Some(Commands::List) = args.command {
        let executions = registry.get_executions().await;
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    info!(
        loaded,
        working_directory = %registry.config().working_directory.display(),
        "Monitor started"
    );

    let event_log = tokio::spawn(log_events(events));
    let reconciliation = ReconciliationLoop::spawn(registry.clone(), interval);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    reconciliation.shutdown().await;
    event_log.abort();
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    loop {
        match events.recv().await {
            Ok(ExecutionEvent::StatusDidChange {
                execution,
                previous,
            }) => {
                info!(
                    execution_id = %execution.id(),
                    from = %previous,
                    to = %execution.status(),
                    "Execution status changed"
                );
            }
            Ok(ExecutionEvent::HasFinalData(execution)) => {
                info!(execution_id = %execution.id(), "Execution has final data");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Execution event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
