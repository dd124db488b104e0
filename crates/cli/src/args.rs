//! Command-line arguments
//!
//! Flags override the config file, which overrides built-in defaults.

use anyhow::{Context, Result};
use clap::Parser;
use dtree_core::verbosity::parse_mask;
use dtree_core::{DtreeConfig, OverflowStrategy};
use std::path::PathBuf;

/// dtree - keep an in-memory mirror of directory trees in step with the kernel
#[derive(Parser, Debug)]
#[command(name = "dtree")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directories to monitor
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,

    /// Config file (default: ~/.config/dtree/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Debug category mask, decimal or 0x-prefixed
    /// (1 events, 2 cache, 4 roots, 8 renames, 0x10 check, 0x20 rescan)
    #[arg(short, long, value_parser = parse_verbosity)]
    pub verbosity: Option<u32>,

    /// Also log to this file
    #[arg(short, long)]
    pub log_file: Option<PathBuf>,

    /// Rebuild the cache on a cache problem instead of aborting
    #[arg(short = 'x', long, conflicts_with = "abort_on_problem")]
    pub rebuild_on_problem: bool,

    /// Abort on a cache problem (the default unless the config says otherwise)
    #[arg(long)]
    pub abort_on_problem: bool,

    /// File to create before aborting
    #[arg(short, long)]
    pub stop_file: Option<PathBuf>,

    /// Overflow handling: rescan or abort
    #[arg(long, value_parser = parse_overflow)]
    pub overflow: Option<OverflowStrategy>,

    /// Seconds between consistency checks (0 = only on command)
    #[arg(short = 'i', long)]
    pub check_interval: Option<u64>,

    /// Stop after this many periodic checks (0 = never)
    #[arg(short, long)]
    pub max_checks: Option<u64>,

    /// Stop after this many seconds (0 = never)
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Milliseconds to wait for the second half of a rename
    #[arg(short = 'w', long)]
    pub rename_window: Option<u64>,
}

impl Cli {
    /// Load the config file and apply flag overrides
    pub fn load_config(&self) -> Result<DtreeConfig> {
        let config = match &self.config {
            Some(path) => DtreeConfig::load(path)?,
            None => DtreeConfig::load_default()?,
        };
        self.apply(config)
    }

    /// Apply flag overrides to `config` and validate the result
    pub fn apply(&self, mut config: DtreeConfig) -> Result<DtreeConfig> {
        if let Some(verbosity) = self.verbosity {
            config.verbosity = verbosity;
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if self.rebuild_on_problem {
            config.abort_on_cache_problem = false;
        }
        if self.abort_on_problem {
            config.abort_on_cache_problem = true;
        }
        if let Some(stop_file) = &self.stop_file {
            config.stop_file = Some(stop_file.clone());
        }
        if let Some(overflow) = self.overflow {
            config.overflow = overflow;
        }
        if let Some(secs) = self.check_interval {
            config.check_interval_secs = secs;
        }
        if let Some(max_checks) = self.max_checks {
            config.max_checks = max_checks;
        }
        if let Some(secs) = self.duration {
            config.duration_secs = secs;
        }
        if let Some(ms) = self.rename_window {
            config.rename_window_ms = ms;
        }

        config.validate().context("Invalid options")?;
        Ok(config)
    }
}

fn parse_verbosity(text: &str) -> Result<u32, String> {
    parse_mask(text).map_err(|e| format!("invalid mask {:?}: {}", text, e))
}

fn parse_overflow(text: &str) -> Result<OverflowStrategy, String> {
    match text {
        "rescan" => Ok(OverflowStrategy::Rescan),
        "abort" => Ok(OverflowStrategy::Abort),
        _ => Err(format!("expected rescan or abort, got {:?}", text)),
    }
}
