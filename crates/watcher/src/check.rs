//! Consistency check of the cache against the filesystem
//!
//! Every active entry must still name a directory. A missing path is counted
//! but not fatal: the tree is being mutated while the check runs, and a
//! just-deleted or just-renamed directory is an expected race. A path that
//! exists but is not a directory means a watch id got bound to the wrong
//! object, which no race explains.

use dtree_core::verbosity::targets;
use dtree_core::{WatchCache, WatchId};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Outcome of one consistency check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Active entries examined
    pub checked: usize,

    /// Entries whose path could not be found
    pub missing: usize,

    /// Entries whose path exists but is not a directory
    pub not_directories: Vec<(WatchId, PathBuf)>,

    /// Paths held by more than one entry
    pub duplicate_paths: usize,
}

impl CheckReport {
    /// Total failures, fatal or not
    pub fn failures(&self) -> usize {
        self.missing + self.not_directories.len()
    }

    /// The cache holds an identity it cannot explain
    pub fn is_divergent(&self) -> bool {
        !self.not_directories.is_empty()
    }

    /// One-line description for divergence reports
    pub fn describe(&self) -> String {
        let listed: Vec<String> = self
            .not_directories
            .iter()
            .map(|(id, path)| format!("watch {} -> {}", id, path.display()))
            .collect();
        format!("cached paths are not directories: {}", listed.join(", "))
    }
}

/// Check every active cache entry against the filesystem
///
/// Does not modify the cache.
pub fn check_cache(cache: &WatchCache) -> CheckReport {
    let mut report = CheckReport::default();

    for (slot, entry) in cache.iter() {
        report.checked += 1;
        let path = entry.path();

        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => {
                tracing::debug!(
                    target: targets::CHECK,
                    "slot {} watch {}: {} ok",
                    slot,
                    entry.watch_id(),
                    path.display()
                );
            }
            Ok(_) => {
                tracing::error!(
                    "slot {} watch {}: {} is not a directory",
                    slot,
                    entry.watch_id(),
                    path.display()
                );
                report
                    .not_directories
                    .push((entry.watch_id(), path.to_path_buf()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "slot {} watch {}: {} does not exist",
                    slot,
                    entry.watch_id(),
                    path.display()
                );
                report.missing += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "slot {} watch {}: cannot stat {}: {}",
                    slot,
                    entry.watch_id(),
                    path.display(),
                    e
                );
                report.missing += 1;
            }
        }
    }

    for path in cache.duplicate_paths() {
        tracing::warn!("{} is cached more than once", path.display());
        report.duplicate_paths += 1;
    }

    tracing::info!(
        "consistency check: {} entries, {} missing, {} not directories, {} duplicate paths",
        report.checked,
        report.missing,
        report.not_directories.len(),
        report.duplicate_paths
    );
    report
}
