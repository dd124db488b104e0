//! Structural change events
//!
//! The kernel adapter turns each notification into an [`Event`]. Only the
//! event types that change the directory structure are modelled.

use crate::cache::WatchId;
use std::ffi::{OsStr, OsString};

/// What happened to a watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Entry created inside the watched directory
    Create,

    /// The watched directory itself was deleted
    DeleteSelf,

    /// The watched directory itself was moved
    MoveSelf,

    /// Entry moved out of the watched directory (first half of a rename)
    MovedFrom,

    /// Entry moved into the watched directory (second half of a rename)
    MovedTo,

    /// The kernel queue overflowed; at least one event was lost
    Overflow,

    /// The kernel dropped the watch
    Ignored,

    /// The filesystem holding the watched directory was unmounted
    Unmount,

    /// Anything else the adapter does not care about
    Other,
}

/// One structural change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Watch the event was reported on (`WatchId::UNUSED` for overflow)
    pub watch_id: WatchId,

    pub kind: EventKind,

    /// The subject of the event is a directory
    pub is_dir: bool,

    /// Rename correlation token, present on `MovedFrom`/`MovedTo`
    pub cookie: Option<u32>,

    /// Name of the child inside the watched directory
    pub name: Option<OsString>,
}

impl Event {
    /// Event about the watched directory itself
    pub fn on_watch(watch_id: WatchId, kind: EventKind) -> Self {
        Self {
            watch_id,
            kind,
            is_dir: false,
            cookie: None,
            name: None,
        }
    }

    /// Event about a named child of the watched directory
    pub fn on_child(watch_id: WatchId, kind: EventKind, name: impl Into<OsString>, is_dir: bool) -> Self {
        Self {
            watch_id,
            kind,
            is_dir,
            cookie: None,
            name: Some(name.into()),
        }
    }

    /// Queue overflow marker
    pub fn overflow() -> Self {
        Self::on_watch(WatchId::UNUSED, EventKind::Overflow)
    }

    /// Attach a rename cookie
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn name(&self) -> Option<&OsStr> {
        self.name.as_deref()
    }
}
