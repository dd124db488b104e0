//! Linux inotify implementation
//!
//! Uses the inotify crate directly; the reconciler consumes raw watch
//! descriptors and rename cookies.

use super::{KernelWatcher, WatcherDiagnostics};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dtree_core::verbosity::targets;
use dtree_core::{Event, EventKind, WatchId};
use futures::StreamExt;
use inotify::{EventMask, EventStream, Inotify, WatchDescriptor, WatchMask, Watches};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;

/// Inotify read buffer size
const INOTIFY_BUFFER_SIZE: usize = 4096;

/// Events registered on every watched directory
fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
        | WatchMask::ONLYDIR
        | WatchMask::DONT_FOLLOW
}

/// Directory watcher backed by one inotify instance
pub struct InotifyWatcher {
    /// Async event stream over the inotify descriptor
    stream: EventStream<Vec<u8>>,

    /// Watch registry sharing the stream's descriptor
    watches: Watches,

    /// Kernel descriptor -> id handed to the reconciler
    ids: HashMap<WatchDescriptor, WatchId>,

    /// Reverse mapping, for removal
    descriptors: HashMap<WatchId, WatchDescriptor>,

    /// Next id to hand out
    next_id: i32,

    diagnostics: WatcherDiagnostics,
}

impl InotifyWatcher {
    /// Open a new inotify instance
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let (stream, watches) = open()?;

        Ok(Self {
            stream,
            watches,
            ids: HashMap::new(),
            descriptors: HashMap::new(),
            next_id: 1,
            diagnostics: WatcherDiagnostics {
                platform_info: "inotify instance 1".to_string(),
                ..WatcherDiagnostics::default()
            },
        })
    }

    /// Convert a kernel event, retiring the mapping once the watch is gone
    fn convert_event(&mut self, event: inotify::Event<OsString>) -> Event {
        self.diagnostics.events_received += 1;

        let kind = convert_mask(event.mask);
        let watch_id = match kind {
            EventKind::Overflow => {
                self.diagnostics.overflow_count += 1;
                WatchId::UNUSED
            }
            _ => self.ids.get(&event.wd).copied().unwrap_or(WatchId::UNUSED),
        };

        // IN_IGNORED is the last event the kernel sends for a descriptor
        if kind == EventKind::Ignored {
            if let Some(id) = self.ids.remove(&event.wd) {
                self.descriptors.remove(&id);
            }
        }

        Event {
            watch_id,
            kind,
            is_dir: event.mask.contains(EventMask::ISDIR),
            cookie: (event.cookie != 0).then_some(event.cookie),
            name: event.name,
        }
    }
}

#[async_trait]
impl KernelWatcher for InotifyWatcher {
    fn add_watch(&mut self, path: &Path) -> Result<WatchId> {
        let wd = self
            .watches
            .add(path, watch_mask())
            .with_context(|| format!("Failed to add watch for {}", path.display()))?;

        // The kernel hands back the existing descriptor for an inode it already watches
        if let Some(id) = self.ids.get(&wd) {
            return Ok(*id);
        }

        let id = WatchId::new(self.next_id);
        self.next_id += 1;
        self.ids.insert(wd.clone(), id);
        self.descriptors.insert(id, wd);
        self.diagnostics.watches_added += 1;

        Ok(id)
    }

    fn remove_watch(&mut self, watch_id: WatchId) -> Result<()> {
        let wd = self
            .descriptors
            .get(&watch_id)
            .cloned()
            .with_context(|| format!("Unknown watch {}", watch_id))?;

        self.watches
            .remove(wd)
            .with_context(|| format!("Failed to remove watch {}", watch_id))?;
        self.diagnostics.watches_removed += 1;

        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<Event>> {
        match self.stream.next().await {
            Some(Ok(event)) => Ok(Some(self.convert_event(event))),
            Some(Err(e)) => Err(e).context("Failed to read inotify events"),
            None => Ok(None),
        }
    }

    fn reset(&mut self) -> Result<()> {
        let (stream, watches) = open()?;

        // Dropping the old stream closes its descriptor and every watch on it
        self.stream = stream;
        self.watches = watches;
        self.ids.clear();
        self.descriptors.clear();

        self.diagnostics.resets += 1;
        self.diagnostics.platform_info = format!("inotify instance {}", self.diagnostics.resets + 1);
        tracing::debug!(target: targets::RESCAN, "inotify instance reopened");

        Ok(())
    }

    fn diagnostics(&self) -> WatcherDiagnostics {
        self.diagnostics.clone()
    }
}

fn open() -> Result<(EventStream<Vec<u8>>, Watches)> {
    let inotify = Inotify::init().context("Failed to initialize inotify")?;
    let watches = inotify.watches();
    let stream = inotify
        .into_event_stream(vec![0u8; INOTIFY_BUFFER_SIZE])
        .context("Failed to create inotify event stream")?;
    Ok((stream, watches))
}

/// Pick the structural event a mask describes
fn convert_mask(mask: EventMask) -> EventKind {
    if mask.contains(EventMask::Q_OVERFLOW) {
        EventKind::Overflow
    } else if mask.contains(EventMask::IGNORED) {
        EventKind::Ignored
    } else if mask.contains(EventMask::UNMOUNT) {
        EventKind::Unmount
    } else if mask.contains(EventMask::DELETE_SELF) {
        EventKind::DeleteSelf
    } else if mask.contains(EventMask::MOVE_SELF) {
        EventKind::MoveSelf
    } else if mask.contains(EventMask::MOVED_FROM) {
        EventKind::MovedFrom
    } else if mask.contains(EventMask::MOVED_TO) {
        EventKind::MovedTo
    } else if mask.contains(EventMask::CREATE) {
        EventKind::Create
    } else {
        EventKind::Other
    }
}
