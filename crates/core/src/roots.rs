//! Root set: the top-level directories named for monitoring
//!
//! Roots are validated once at startup. Each keeps the (device, inode) pair it
//! had then, so two arguments naming the same directory are caught early.
//! A root is retired when it is deleted or renamed away; once every root is
//! retired there is nothing left to monitor.

use crate::error::RootError;
use crate::verbosity::targets;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// A validated root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl RootEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// (device, inode) captured at startup
    pub fn identity(&self) -> (u64, u64) {
        (self.dev, self.ino)
    }
}

/// Result of retiring a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootStatus {
    /// The path is not a live root; nothing changed
    NotARoot,

    /// The root was retired and this many roots are still live
    Remaining(usize),

    /// The last live root was retired
    Exhausted,
}

/// Ordered set of monitored roots
#[derive(Debug)]
pub struct RootSet {
    /// One slot per configured root; `None` once retired
    roots: Vec<Option<RootEntry>>,

    retired: usize,
}

impl RootSet {
    /// Validate `paths` and capture their identities
    ///
    /// Every path must exist and be a directory, and no two may refer to the
    /// same directory. Paths are stored canonicalized.
    pub fn initialize<P: AsRef<Path>>(paths: &[P]) -> Result<Self, RootError> {
        if paths.is_empty() {
            return Err(RootError::Empty);
        }

        let mut roots: Vec<Option<RootEntry>> = Vec::with_capacity(paths.len());

        for path in paths {
            let path = path.as_ref();

            let metadata = fs::metadata(path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RootError::NotFound(path.to_path_buf()),
                _ => RootError::Io {
                    path: path.to_path_buf(),
                    source: e,
                },
            })?;

            if !metadata.is_dir() {
                return Err(RootError::NotADirectory(path.to_path_buf()));
            }

            let canonical = fs::canonicalize(path).map_err(|e| RootError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

            let entry = RootEntry {
                path: canonical,
                dev: metadata.dev(),
                ino: metadata.ino(),
            };

            if let Some(existing) = roots
                .iter()
                .flatten()
                .find(|r| r.identity() == entry.identity())
            {
                return Err(RootError::Duplicate {
                    first: existing.path.clone(),
                    second: path.to_path_buf(),
                });
            }

            tracing::debug!(
                target: targets::ROOTS,
                "root {} (dev {}, ino {})",
                entry.path.display(),
                entry.dev,
                entry.ino
            );
            roots.push(Some(entry));
        }

        Ok(Self { roots, retired: 0 })
    }

    /// Check whether `path` is a live root
    pub fn is_root(&self, path: &Path) -> bool {
        self.locate(path).is_some()
    }

    /// Index of the live root at `path`
    pub fn locate(&self, path: &Path) -> Option<usize> {
        self.roots
            .iter()
            .position(|r| r.as_ref().is_some_and(|r| r.path == path))
    }

    /// Stop monitoring the root at `path`
    pub fn retire(&mut self, path: &Path) -> RootStatus {
        let Some(index) = self.locate(path) else {
            return RootStatus::NotARoot;
        };

        self.roots[index] = None;
        self.retired += 1;

        let remaining = self.live_count();
        tracing::info!(
            "root {} is no longer monitored ({} remaining)",
            path.display(),
            remaining
        );

        if remaining == 0 {
            RootStatus::Exhausted
        } else {
            RootStatus::Remaining(remaining)
        }
    }

    /// Live roots in argument order
    pub fn live(&self) -> impl Iterator<Item = &RootEntry> {
        self.roots.iter().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn retired_count(&self) -> usize {
        self.retired
    }

    /// (device, inode) of the live root at `path`
    pub fn identity(&self, path: &Path) -> Option<(u64, u64)> {
        self.locate(path)
            .and_then(|i| self.roots[i].as_ref())
            .map(RootEntry::identity)
    }
}
