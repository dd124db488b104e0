//! Watch cache: watch id -> directory path
//!
//! The cache is a flat slot vector searched linearly. Slots are recycled and
//! never removed, so a slot stays bound to one watch for as long as that watch
//! lives. Storage grows in fixed increments instead of doubling: its size
//! follows the number of watched directories, not a load factor.

use crate::error::CacheError;
use crate::verbosity::targets;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Number of slots added each time the cache runs out of free slots
pub const GROWTH_INCREMENT: usize = 200;

/// Longest path (in bytes) stored in a slot
pub const PATH_MAX: usize = 4096;

/// Identifier of a kernel watch
///
/// Negative values never name a live watch; [`WatchId::UNUSED`] marks free
/// slots and events that are not bound to a watch (queue overflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(i32);

impl WatchId {
    /// Sentinel for "no watch"
    pub const UNUSED: WatchId = WatchId(-1);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_unused(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an entry in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(usize);

impl Slot {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cache slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    watch_id: WatchId,
    path: PathBuf,
}

impl WatchEntry {
    fn unused() -> Self {
        Self {
            watch_id: WatchId::UNUSED,
            path: PathBuf::new(),
        }
    }

    pub fn watch_id(&self) -> WatchId {
        self.watch_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        !self.watch_id.is_unused()
    }
}

/// In-memory mirror of the watched directory trees
#[derive(Debug)]
pub struct WatchCache {
    /// Slot storage; free slots carry `WatchId::UNUSED`
    slots: Vec<WatchEntry>,

    /// Slots added per growth step
    increment: usize,

    /// Number of growth steps taken so far
    growth_steps: usize,
}

impl WatchCache {
    /// Create an empty cache using the default growth increment
    pub fn new() -> Self {
        Self::with_increment(GROWTH_INCREMENT)
    }

    /// Create an empty cache growing `increment` slots at a time
    pub fn with_increment(increment: usize) -> Self {
        Self {
            slots: Vec::new(),
            increment: increment.max(1),
            growth_steps: 0,
        }
    }

    /// Record that `watch_id` now watches `path`
    ///
    /// Takes the first free slot, growing the storage by one increment when
    /// every slot is in use. Fails only when the storage cannot grow.
    pub fn add(&mut self, watch_id: WatchId, path: &Path) -> Result<Slot, CacheError> {
        debug_assert!(!watch_id.is_unused(), "cannot cache the unused sentinel");

        let index = match self.slots.iter().position(|e| !e.is_active()) {
            Some(index) => index,
            None => self.grow()?,
        };

        let entry = &mut self.slots[index];
        entry.watch_id = watch_id;
        entry.path = bounded(path);

        tracing::debug!(
            target: targets::CACHE,
            "cache add: slot {} watch {} -> {}",
            index,
            watch_id,
            entry.path.display()
        );
        Ok(Slot(index))
    }

    /// Append one increment of free slots, returning the first new index
    fn grow(&mut self) -> Result<usize, CacheError> {
        let first_new = self.slots.len();

        self.slots
            .try_reserve_exact(self.increment)
            .map_err(|_| CacheError::Allocation { capacity: first_new })?;
        self.slots
            .resize_with(first_new + self.increment, WatchEntry::unused);
        self.growth_steps += 1;

        tracing::debug!(
            target: targets::CACHE,
            "cache grown to {} slots",
            self.slots.len()
        );
        Ok(first_new)
    }

    /// Find the slot holding `watch_id`
    ///
    /// `None` is an ordinary answer: the watch may already have been removed
    /// (duplicate delete notifications, events queued before a removal).
    pub fn find(&self, watch_id: WatchId) -> Option<Slot> {
        if watch_id.is_unused() {
            return None;
        }
        self.slots
            .iter()
            .position(|e| e.watch_id == watch_id)
            .map(Slot)
    }

    /// Find the slot holding `watch_id`, treating absence as a problem
    ///
    /// A miss here means the cache has drifted from the kernel's view of the
    /// watches. The caller decides whether to rebuild or abort.
    pub fn find_checked(&self, watch_id: WatchId) -> Result<Slot, CacheError> {
        self.find(watch_id).ok_or(CacheError::MissingWatch(watch_id))
    }

    /// Free a slot. Removing a free slot is a no-op.
    pub fn remove(&mut self, slot: Slot) {
        if let Some(entry) = self.slots.get_mut(slot.0) {
            if entry.is_active() {
                tracing::debug!(
                    target: targets::CACHE,
                    "cache remove: slot {} watch {} ({})",
                    slot,
                    entry.watch_id,
                    entry.path.display()
                );
            }
            *entry = WatchEntry::unused();
        }
    }

    /// Find the active slot whose path is exactly `path`
    pub fn path_to_slot(&self, path: &Path) -> Option<Slot> {
        self.slots
            .iter()
            .position(|e| e.is_active() && e.path == path)
            .map(Slot)
    }

    /// Check whether any active slot holds `path`
    pub fn contains_path(&self, path: &Path) -> bool {
        self.path_to_slot(path).is_some()
    }

    /// Get the active entry at `slot`
    pub fn entry(&self, slot: Slot) -> Option<&WatchEntry> {
        self.slots.get(slot.0).filter(|e| e.is_active())
    }

    /// Move every cached path at or below `old` to the same place below `new`
    ///
    /// Returns the number of rewritten entries. Matching is per path
    /// component, so `/a/bc` is not below `/a/b`.
    pub fn rewrite_prefix(&mut self, old: &Path, new: &Path) -> usize {
        let mut rewritten = 0;

        for (index, entry) in self.slots.iter_mut().enumerate() {
            if !entry.is_active() {
                continue;
            }
            let Ok(rest) = entry.path.strip_prefix(old) else {
                continue;
            };

            let renamed = if rest.as_os_str().is_empty() {
                new.to_path_buf()
            } else {
                new.join(rest)
            };

            tracing::debug!(
                target: targets::CACHE,
                "cache rename: slot {} watch {} {} -> {}",
                index,
                entry.watch_id,
                entry.path.display(),
                renamed.display()
            );
            entry.path = bounded(&renamed);
            rewritten += 1;
        }

        rewritten
    }

    /// Slots of `path` itself and every cached directory below it
    pub fn slots_under(&self, path: &Path) -> Vec<Slot> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_active() && e.path.starts_with(path))
            .map(|(index, _)| Slot(index))
            .collect()
    }

    /// Iterate over active entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &WatchEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_active())
            .map(|(index, e)| (Slot(index), e))
    }

    /// Paths held by more than one active slot
    pub fn duplicate_paths(&self) -> Vec<PathBuf> {
        let mut seen: HashMap<&Path, usize> = HashMap::new();
        for (_, entry) in self.iter() {
            *seen.entry(entry.path()).or_default() += 1;
        }

        let mut duplicates: Vec<PathBuf> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(path, _)| path.to_path_buf())
            .collect();
        duplicates.sort();
        duplicates
    }

    /// Number of active entries
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, free or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn growth_steps(&self) -> usize {
        self.growth_steps
    }

    /// Free every slot, keeping the storage
    pub fn clear(&mut self) {
        for entry in &mut self.slots {
            *entry = WatchEntry::unused();
        }
    }

    /// Write every active entry, one per line, in slot order
    pub fn dump<W: Write>(&self, mut sink: W) -> io::Result<()> {
        writeln!(
            sink,
            "watch cache: {} active entries in {} slots",
            self.len(),
            self.capacity()
        )?;
        for (slot, entry) in self.iter() {
            writeln!(
                sink,
                "{:>6} {:>6}  {}",
                slot,
                entry.watch_id,
                entry.path.display()
            )?;
        }
        Ok(())
    }
}

impl Default for WatchCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `path`, cutting it to `PATH_MAX` bytes
fn bounded(path: &Path) -> PathBuf {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() <= PATH_MAX {
        return path.to_path_buf();
    }

    tracing::warn!(
        "path of {} bytes truncated to {} bytes: {}",
        bytes.len(),
        PATH_MAX,
        path.display()
    );
    PathBuf::from(OsStr::from_bytes(&bytes[..PATH_MAX]))
}
