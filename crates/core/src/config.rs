//! Monitor configuration
//!
//! Config is read from `~/.config/dtree/config.toml` (or an explicit path)
//! and every key is optional. Command-line flags override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::verbosity::Verbosity;

/// What to do when the kernel reports a queue overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowStrategy {
    /// Drop the cache and rebuild it from a fresh walk of every live root
    Rescan,

    /// Treat the cache as untrustworthy and take the escape hatch
    Abort,
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtreeConfig {
    /// Debug category mask (see `Verbosity`, default: 0)
    pub verbosity: u32,

    /// Log file, in addition to the console (default: none)
    pub log_file: Option<PathBuf>,

    /// Abort on a cache problem instead of rebuilding (default: true)
    pub abort_on_cache_problem: bool,

    /// File created before aborting, to stop cooperating load generators
    pub stop_file: Option<PathBuf>,

    /// Overflow handling (default: rescan)
    pub overflow: OverflowStrategy,

    /// Seconds between consistency checks, 0 = only on command (default: 0)
    pub check_interval_secs: u64,

    /// Stop after this many consistency checks, 0 = never (default: 0)
    pub max_checks: u64,

    /// Stop after this many seconds, 0 = never (default: 0)
    pub duration_secs: u64,

    /// How long an unpaired moved-from waits for its moved-to (default: 50ms)
    pub rename_window_ms: u64,
}

impl Default for DtreeConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            log_file: None,
            abort_on_cache_problem: true,
            stop_file: None,
            overflow: OverflowStrategy::Rescan,
            check_interval_secs: 0,
            max_checks: 0,
            duration_secs: 0,
            rename_window_ms: 50,
        }
    }
}

impl DtreeConfig {
    /// Load configuration from `path`, or defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config at {}", path.display()))?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::debug!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.rename_window_ms == 0 || self.rename_window_ms > 10_000 {
            anyhow::bail!(
                "rename_window_ms must be between 1 and 10000 (got {})",
                self.rename_window_ms
            );
        }
        if self.max_checks > 0 && self.check_interval_secs == 0 {
            anyhow::bail!("max_checks requires a non-zero check_interval_secs");
        }
        Ok(())
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_mask(self.verbosity)
    }

    pub fn rename_window(&self) -> Duration {
        Duration::from_millis(self.rename_window_ms)
    }

    pub fn check_interval(&self) -> Option<Duration> {
        (self.check_interval_secs > 0).then(|| Duration::from_secs(self.check_interval_secs))
    }

    pub fn max_checks(&self) -> Option<u64> {
        (self.max_checks > 0).then_some(self.max_checks)
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }
}

/// `~/.config/dtree/config.toml` on Linux
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("dtree").join("config.toml"))
}
