//! Error types for event processing

use dtree_core::CacheError;

/// Errors surfaced by the reconciler and the monitor loop
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The cache no longer matches the filesystem and policy says stop
    #[error("watch cache diverged: {0}")]
    Divergence(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for event processing
pub type Result<T> = std::result::Result<T, WatchError>;
