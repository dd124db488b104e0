//! dtree - directory-tree shadow cache monitor

use anyhow::{Context, Result};
use clap::Parser;
use dtree_cli::{commands, logging, Cli};
use dtree_core::RootSet;
use dtree_watcher::{
    EscapeHatch, InotifyWatcher, Monitor, MonitorOptions, Outcome, Policy, Reconciler,
};
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tokio::sync::mpsc;

/// Pending control commands
const COMMAND_QUEUE: usize = 16;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = cli.load_config()?;
    logging::init(config.verbosity(), config.log_file.as_deref())?;

    let roots = RootSet::initialize(&cli.roots).context("Invalid roots")?;
    let watcher = InotifyWatcher::new()?;
    let mut reconciler = Reconciler::new(watcher, roots, Policy::from(&config));

    // A root that vanished during the initial walk is already retired; the
    // monitor returns at once if none are left
    reconciler.start()?;

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    commands::spawn_signal_listener(tx.clone())?;
    commands::spawn_stdin_reader(tx)?;

    let mut monitor = Monitor::new(
        reconciler,
        EscapeHatch::new(config.stop_file.clone()),
        MonitorOptions::from(&config),
    );
    let outcome = monitor.run(rx).await?;

    print_summary(&monitor, outcome);
    Ok(outcome)
}

fn print_summary(monitor: &Monitor<InotifyWatcher>, outcome: Outcome) {
    let reason = match outcome {
        Outcome::RootsExhausted => "all roots are gone",
        Outcome::Quit => "quit",
        Outcome::DeadlineReached => "run duration reached",
        Outcome::ChecksCompleted => "check limit reached",
        Outcome::SourceClosed => "event source closed",
    };
    let reconciler = monitor.reconciler();
    let stats = reconciler.stats();

    println!("{} {}", "Stopped:".green().bold(), reason);
    println!(
        "  {} events, {} created, {} deleted, {} renamed, {} moved out",
        stats.events, stats.created, stats.deleted, stats.renamed, stats.moved_out
    );
    println!(
        "  {} overflows, {} rebuilds, {} periodic checks",
        stats.overflows,
        stats.rebuilds,
        monitor.checks_run()
    );
    println!(
        "  {} directories cached, {} of {} roots live",
        reconciler.cache().len(),
        reconciler.roots().live_count(),
        reconciler.roots().live_count() + reconciler.roots().retired_count()
    );
}
