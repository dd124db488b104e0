//! Kernel notification sources
//!
//! Provides a unified interface (`KernelWatcher` trait) over the Linux
//! inotify adapter and an in-memory source used for replay and tests.

#[cfg(target_os = "linux")]
pub mod linux;

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use dtree_core::{Event, WatchId};
use std::path::Path;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub use linux::InotifyWatcher;

pub use memory::MemoryWatcher;

/// Watcher diagnostics
#[derive(Debug, Clone, Default)]
pub struct WatcherDiagnostics {
    /// Total events received from the source
    pub events_received: u64,

    /// Number of overflow events seen
    pub overflow_count: u64,

    /// Watches successfully added
    pub watches_added: u64,

    /// Watches removed on request
    pub watches_removed: u64,

    /// Times the source was torn down and reopened
    pub resets: u64,

    /// Source-specific info (e.g., "inotify instance 2")
    pub platform_info: String,
}

/// Source of directory-structure events plus the watch registry behind it
///
/// Watch ids handed out by `add_watch` are the ids later carried by events.
#[async_trait]
pub trait KernelWatcher: Send {
    /// Start watching the directory at `path`
    ///
    /// Watching a directory that is already watched (same inode) returns the
    /// existing id.
    fn add_watch(&mut self, path: &Path) -> Result<WatchId>;

    /// Stop watching; an `Ignored` event for the id follows
    fn remove_watch(&mut self, watch_id: WatchId) -> Result<()>;

    /// Wait for the next event
    ///
    /// Returns `None` once the source has ended.
    async fn next_event(&mut self) -> Result<Option<Event>>;

    /// Wait at most `window` for the next event
    ///
    /// Returns `None` if nothing arrived in time.
    async fn next_event_within(&mut self, window: Duration) -> Result<Option<Event>> {
        match tokio::time::timeout(window, self.next_event()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Drop every watch and every queued event, starting over empty
    fn reset(&mut self) -> Result<()>;

    /// Get diagnostic information
    fn diagnostics(&self) -> WatcherDiagnostics;
}
