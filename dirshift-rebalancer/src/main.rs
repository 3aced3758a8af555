//! dirshift
//!
//! Moves directories from source volumes to destination volumes until the
//! sources run dry or the destinations fill up, then lists every directory
//! that could not be moved.

use anyhow::Context;
use clap::Parser;
use dirshift_core::{FsProbe, TransferMode};
use dirshift_rebalancer::{
    DirectoryMover, Executor, ProgressStatus, ProgressUpdate, RebalancerConfig, Rebalancer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "dirshift")]
#[command(about = "Rebalance directories from source volumes to destination volumes")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, or YAML by extension)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Maximum simultaneous transfers per round (0 = unlimited)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Transfer mechanism: copy or rsync
    #[arg(long)]
    mode: Option<TransferMode>,

    /// Plan one round and exit without moving anything
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Write the failure report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn print_progress(update: &ProgressUpdate) {
    let source = update.source.display();
    let destination = update.destination.display();
    match &update.status {
        ProgressStatus::Started => println!("{source} -> {destination} started"),
        ProgressStatus::Completed => println!("{source} -> {destination} done"),
        ProgressStatus::Failed(reason) => {
            println!("{source} -> {destination} failed: {reason}")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(true)
        .init();

    let config = RebalancerConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?
        .resolve(cli.max_concurrent, cli.mode, cli.dry_run, cli.report)
        .context("Invalid configuration after overrides")?;

    info!(
        config = %cli.config.display(),
        sources = config.shift.source_paths.len(),
        destinations = config.shift.destination_paths.len(),
        mode = %config.shift.transfer.mode,
        max_concurrent = config.shift.transfer.max_concurrent,
        dry_run = config.dry_run,
        "Starting dirshift"
    );

    let mover = DirectoryMover::from_settings(&config.shift.transfer);
    let (executor, mut progress_rx) = Executor::with_progress(config.executor_config(), mover);
    let mut rebalancer = Rebalancer::new(&config, Arc::new(FsProbe::new()), executor);

    // Spawn progress reporter
    let reporter = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            print_progress(&update);
        }
    });

    // Ctrl-C lets the current round finish, then stops
    let shutdown = rebalancer.shutdown_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping after the current round");
            shutdown.request();
        }
    });

    let outcome = rebalancer.run().await;
    let ledger = rebalancer.ledger().clone();

    // Closes the progress channel so the reporter drains and exits
    drop(rebalancer);
    let _ = reporter.await;

    let outcome = outcome.context("Rebalancing aborted")?;

    println!("{}", outcome.reason.message());
    for a in &outcome.planned {
        println!(
            "would move {} -> {}",
            a.source.display(),
            a.destination.display()
        );
    }

    let report = ledger.render_report();
    if !report.is_empty() {
        print!("{report}");
    }

    if let Some(path) = &config.report_path {
        if let Err(e) = ledger.write_json(path) {
            error!(path = %path.display(), error = %e, "Failed to write failure report");
        }
    }

    Ok(())
}
