//! Error types for the cache and the root set

use crate::cache::WatchId;
use std::path::PathBuf;

/// Errors raised by the watch cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The slot vector could not grow; the cache can no longer hold its invariant
    #[error("failed to grow watch cache beyond {capacity} slots")]
    Allocation { capacity: usize },

    /// A watch id the kernel reported is not in the cache
    #[error("watch {0} is not in the cache")]
    MissingWatch(WatchId),
}

/// Errors raised while validating the root set at startup
#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("no root directories given")]
    Empty,

    #[error("root {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Two arguments resolve to the same (device, inode)
    #[error("roots {} and {} refer to the same directory", .first.display(), .second.display())]
    Duplicate { first: PathBuf, second: PathBuf },

    #[error("failed to inspect root {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
