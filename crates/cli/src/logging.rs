//! Logging setup
//!
//! Info, warnings and errors always go to stderr. Debug output is enabled per
//! category by the verbosity mask. The optional log file is written
//! synchronously so that the last lines before an abort are on disk.

use anyhow::{Context, Result};
use dtree_core::Verbosity;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Filter enabling debug output for the categories in `verbosity`
pub fn filter(verbosity: Verbosity) -> Targets {
    verbosity
        .targets()
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .fold(
            Targets::new().with_default(LevelFilter::INFO),
            |targets, (target, _)| targets.with_target(target, LevelFilter::DEBUG),
        )
}

/// Install the global subscriber
pub fn init(verbosity: Verbosity, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file = log_file.map(open_log_file).transpose()?.map(|appender| {
        fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(filter(verbosity))
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to initialize logging")?;

    if let Some(path) = log_file {
        tracing::debug!("logging to {}", path.display());
    }
    Ok(())
}

/// Open `path` for appending, never rotated
fn open_log_file(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file {} has no file name", path.display()))?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(directory)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
