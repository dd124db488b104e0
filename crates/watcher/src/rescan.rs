//! Subtree walks
//!
//! Adding watches races with the tree changing underneath: a directory may be
//! gone, or replaced by a file, by the time its watch is requested. Those
//! failures are expected and skipped. Any other failure to watch an existing
//! directory is an error.

use crate::error::{Result, WatchError};
use crate::platform::KernelWatcher;
use crate::reconcile::Reconciler;
use dtree_core::verbosity::targets;
use dtree_core::WatchId;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of watching one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watched {
    /// A new cache entry was made
    Added(WatchId),

    /// The watch was already cached, possibly under another path
    Cached(WatchId),
}

impl Watched {
    pub fn watch_id(self) -> WatchId {
        match self {
            Watched::Added(watch_id) | Watched::Cached(watch_id) => watch_id,
        }
    }
}

impl<W: KernelWatcher> Reconciler<W> {
    /// Watch `path` and every directory below it
    ///
    /// Each directory is watched before its entries are listed, so a
    /// subdirectory created mid-walk is either listed or reported by an event
    /// on the new watch. Returns the number of directories newly cached.
    pub fn watch_subtree(&mut self, path: &Path) -> Result<usize> {
        let mut watched = 0;

        for entry in WalkDir::new(path).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(target: targets::RESCAN, "walk under {}: {}", path.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            if let Some(Watched::Added(_)) = self.watch_dir(entry.path())? {
                watched += 1;
            }
        }

        tracing::debug!(
            target: targets::RESCAN,
            "walked {}: {} directories watched",
            path.display(),
            watched
        );
        Ok(watched)
    }

    /// Watch one directory and cache it
    ///
    /// Returns `None` when the directory vanished before it could be watched.
    pub fn watch_dir(&mut self, path: &Path) -> Result<Option<Watched>> {
        let Some(watch_id) = self.add_watch(path)? else {
            return Ok(None);
        };

        // The kernel keeps one watch per inode: an id we already hold means the
        // directory was reached under another name
        match self.cache.find(watch_id) {
            Some(slot) => {
                let previous = self
                    .cache
                    .entry(slot)
                    .map(|entry| entry.path().to_path_buf());

                if let Some(previous) = previous.filter(|p| p != path) {
                    tracing::debug!(
                        target: targets::CACHE,
                        "watch {} moved from {} to {}",
                        watch_id,
                        previous.display(),
                        path.display()
                    );
                    self.cache.rewrite_prefix(&previous, path);
                    self.retire_if_root(&previous);
                }
                Ok(Some(Watched::Cached(watch_id)))
            }
            None => {
                self.cache.add(watch_id, path)?;
                Ok(Some(Watched::Added(watch_id)))
            }
        }
    }

    /// Ask the source for a watch on `path` without touching the cache
    ///
    /// `None` when `path` is gone or no longer a directory.
    pub(crate) fn add_watch(&mut self, path: &Path) -> Result<Option<WatchId>> {
        match self.watcher.add_watch(path) {
            Ok(watch_id) => Ok(Some(watch_id)),
            Err(e) => match fs::symlink_metadata(path) {
                Ok(metadata) if metadata.is_dir() => Err(WatchError::Other(e)),
                _ => {
                    tracing::debug!(
                        target: targets::RESCAN,
                        "{} is gone before it could be watched",
                        path.display()
                    );
                    Ok(None)
                }
            },
        }
    }

    /// Throw the cache away and watch every live root again
    ///
    /// Returns the number of directories watched.
    pub fn rebuild(&mut self) -> Result<usize> {
        tracing::info!("rebuilding watch cache ({} entries)", self.cache.len());

        self.watcher.reset()?;
        self.cache.clear();
        self.moves.clear();
        self.draining.clear();
        self.stats.rebuilds += 1;

        let watched = self.build()?;
        tracing::info!("rebuilt watch cache: {} directories", watched);
        Ok(watched)
    }

    /// Watch the subtree of every live root, retiring roots that are gone
    pub(crate) fn build(&mut self) -> Result<usize> {
        let roots: Vec<PathBuf> = self
            .roots
            .live()
            .map(|root| root.path().to_path_buf())
            .collect();

        let mut watched = 0;
        for root in roots {
            let is_dir = fs::symlink_metadata(&root).is_ok_and(|m| m.is_dir());
            if !is_dir {
                tracing::warn!("root {} is no longer a directory", root.display());
                self.retire_if_root(&root);
                continue;
            }

            tracing::debug!(target: targets::ROOTS, "watching root {}", root.display());
            watched += self.watch_subtree(&root)?;

            if self.cache.path_to_slot(&root).is_none() {
                self.retire_if_root(&root);
            }
        }
        Ok(watched)
    }

    /// Stop watching `path` and everything cached below it
    ///
    /// Every removed id drains until its `Ignored` arrives. Roots inside the
    /// subtree are retired. Returns the number of entries dropped.
    pub(crate) fn drop_subtree(&mut self, path: &Path) -> usize {
        let slots = self.cache.slots_under(path);
        let count = slots.len();

        for slot in slots {
            let Some(watch_id) = self.cache.entry(slot).map(|entry| entry.watch_id()) else {
                continue;
            };

            if !self.draining.contains(&watch_id) {
                if let Err(e) = self.watcher.remove_watch(watch_id) {
                    tracing::debug!(target: targets::CACHE, "remove watch {}: {:#}", watch_id, e);
                }
                self.draining.insert(watch_id);
            }

            if let Some(removed) = self.remove_slot(slot) {
                self.retire_if_root(&removed);
            }
        }

        count
    }
}
