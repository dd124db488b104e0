//! Escape hatch for a cache that can no longer be trusted
//!
//! Creates the stop file that tells cooperating load generators to halt,
//! dumps the cache to the log, and aborts without further cleanup. Serving
//! lookups from a cache known to be wrong would only spread bad data.

use dtree_core::WatchCache;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Stop-file, dump, abort
#[derive(Debug, Clone, Default)]
pub struct EscapeHatch {
    stop_file: Option<PathBuf>,
}

impl EscapeHatch {
    pub fn new(stop_file: Option<PathBuf>) -> Self {
        Self { stop_file }
    }

    pub fn stop_file(&self) -> Option<&Path> {
        self.stop_file.as_deref()
    }

    /// Everything short of terminating: stop file, then cache dump
    pub fn prepare(&self, cache: &WatchCache, reason: &str) {
        tracing::error!("watch cache can no longer be trusted: {}", reason);

        if let Some(path) = &self.stop_file {
            match create_stop_file(path) {
                Ok(()) => tracing::error!("created stop file {}", path.display()),
                Err(e) => tracing::error!("failed to create stop file {}: {}", path.display(), e),
            }
        }

        dump_to_log(cache, true);
    }

    /// Prepare, then abort the process
    pub fn engage(&self, cache: &WatchCache, reason: &str) -> ! {
        self.prepare(cache, reason);
        std::process::abort()
    }
}

/// Write the cache dump to the log, one line per entry
///
/// `fatal` dumps at error level so the dump survives any filtering.
pub fn dump_to_log(cache: &WatchCache, fatal: bool) {
    let mut buffer = Vec::new();
    if let Err(e) = cache.dump(&mut buffer) {
        tracing::error!("failed to dump watch cache: {}", e);
        return;
    }

    for line in String::from_utf8_lossy(&buffer).lines() {
        if fatal {
            tracing::error!("{}", line);
        } else {
            tracing::info!("{}", line);
        }
    }
}

/// Zero-byte, owner-only sentinel
fn create_stop_file(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map(drop)
}
