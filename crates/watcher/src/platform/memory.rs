//! In-memory event source
//!
//! Hands out watch ids the way the kernel does (one per inode, checked
//! against the real filesystem) but takes its events from a queue filled by
//! the caller. Used to replay recorded event sequences and to drive the
//! reconciler deterministically in tests.
//!
//! An empty queue blocks like an idle kernel queue until `close` is called;
//! after that, draining the queue ends the source.

use super::{KernelWatcher, WatcherDiagnostics};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dtree_core::{Event, EventKind, WatchId};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::future;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Queue-driven watcher
#[derive(Debug)]
pub struct MemoryWatcher {
    /// Events waiting to be delivered
    queue: VecDeque<Event>,

    /// Live watches by id -> (device, inode)
    watches: HashMap<WatchId, (u64, u64)>,

    /// Live watches by (device, inode) -> id
    by_identity: HashMap<(u64, u64), WatchId>,

    next_id: i32,

    /// No more events will be pushed
    closed: bool,

    diagnostics: WatcherDiagnostics,
}

impl MemoryWatcher {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            watches: HashMap::new(),
            by_identity: HashMap::new(),
            next_id: 1,
            closed: false,
            diagnostics: WatcherDiagnostics {
                platform_info: "memory".to_string(),
                ..WatcherDiagnostics::default()
            },
        }
    }

    /// Queue an event for delivery
    pub fn push(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// End the source once the queue is drained
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Number of queued events
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Check whether `watch_id` is live
    pub fn is_watched(&self, watch_id: WatchId) -> bool {
        self.watches.contains_key(&watch_id)
    }

    /// Number of live watches
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    fn forget(&mut self, watch_id: WatchId) -> bool {
        match self.watches.remove(&watch_id) {
            Some(identity) => {
                self.by_identity.remove(&identity);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KernelWatcher for MemoryWatcher {
    fn add_watch(&mut self, path: &Path) -> Result<WatchId> {
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to add watch for {}", path.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Failed to add watch for {}: not a directory", path.display());
        }

        let identity = (metadata.dev(), metadata.ino());
        if let Some(id) = self.by_identity.get(&identity) {
            return Ok(*id);
        }

        let id = WatchId::new(self.next_id);
        self.next_id += 1;
        self.watches.insert(id, identity);
        self.by_identity.insert(identity, id);
        self.diagnostics.watches_added += 1;

        Ok(id)
    }

    fn remove_watch(&mut self, watch_id: WatchId) -> Result<()> {
        if !self.forget(watch_id) {
            anyhow::bail!("Unknown watch {}", watch_id);
        }
        self.diagnostics.watches_removed += 1;
        self.queue.push_back(Event::on_watch(watch_id, EventKind::Ignored));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<Event>> {
        let Some(event) = self.queue.pop_front() else {
            if self.closed {
                return Ok(None);
            }
            // Nothing can be pushed while the caller is waiting on us
            return future::pending().await;
        };

        self.diagnostics.events_received += 1;
        match event.kind {
            EventKind::Overflow => self.diagnostics.overflow_count += 1,
            EventKind::Ignored => {
                self.forget(event.watch_id);
            }
            _ => {}
        }

        Ok(Some(event))
    }

    fn reset(&mut self) -> Result<()> {
        self.queue.clear();
        self.watches.clear();
        self.by_identity.clear();
        self.diagnostics.resets += 1;
        Ok(())
    }

    fn diagnostics(&self) -> WatcherDiagnostics {
        self.diagnostics.clone()
    }
}
