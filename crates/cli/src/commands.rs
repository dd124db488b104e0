//! Control input
//!
//! Commands arrive one per line on stdin. Interrupt and terminate signals are
//! turned into `Quit` so the monitor stops through its normal exit path.

use anyhow::{Context, Result};
use dtree_watcher::Command;
use std::io::{self, BufRead};
use std::thread;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Parse one input line; blank and malformed lines yield nothing
pub fn parse_line(line: &str) -> Option<Command> {
    if line.trim().is_empty() {
        return None;
    }
    match line.parse() {
        Ok(command) => Some(command),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Forward commands read from `reader` until it ends or the receiver is gone
///
/// Returns the number of commands forwarded.
pub fn forward_commands<R: BufRead>(reader: R, tx: &mpsc::Sender<Command>) -> usize {
    let mut forwarded = 0;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to read control input: {}", e);
                break;
            }
        };

        if let Some(command) = parse_line(&line) {
            if tx.blocking_send(command).is_err() {
                break;
            }
            forwarded += 1;
        }
    }

    forwarded
}

/// Read stdin on a dedicated thread
///
/// A blocking read cannot be cancelled, so it stays off the runtime; the
/// thread simply ends with the process.
pub fn spawn_stdin_reader(tx: mpsc::Sender<Command>) -> Result<()> {
    thread::Builder::new()
        .name("dtree-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            forward_commands(stdin.lock(), &tx);
        })
        .context("Failed to start control input reader")?;
    Ok(())
}

/// Turn SIGINT and SIGTERM into `Quit`
pub fn spawn_signal_listener(tx: mpsc::Sender<Command>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
        let _ = tx.send(Command::Quit).await;
    });
    Ok(())
}
