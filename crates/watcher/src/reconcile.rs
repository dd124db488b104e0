//! Event reconciliation
//!
//! Applies each kernel event to the watch cache so that the cache keeps
//! mirroring the directory trees below the live roots. The `Reconciler` owns
//! every piece of monitor state: the event source, the cache, the root set,
//! unpaired rename halves and the ids waiting for their final `Ignored`.

use crate::check::{check_cache, CheckReport};
use crate::error::{Result, WatchError};
use crate::moves::{PendingMove, PendingMoves};
use crate::platform::KernelWatcher;
use dtree_core::verbosity::targets;
use dtree_core::{
    DtreeConfig, Event, EventKind, OverflowStrategy, RootSet, RootStatus, Slot, WatchCache,
    WatchId,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How cache problems and overflows are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Escalate cache problems instead of rebuilding
    pub abort_on_cache_problem: bool,

    pub overflow: OverflowStrategy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            abort_on_cache_problem: true,
            overflow: OverflowStrategy::Rescan,
        }
    }
}

impl From<&DtreeConfig> for Policy {
    fn from(config: &DtreeConfig) -> Self {
        Self {
            abort_on_cache_problem: config.abort_on_cache_problem,
            overflow: config.overflow,
        }
    }
}

/// Whether monitoring can go on after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,

    /// Every root has been retired
    RootsExhausted,
}

/// Reconciliation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Events handled
    pub events: u64,

    /// Directories that gained a watch after a create or move-in
    pub created: u64,

    /// Directories removed by delete notifications
    pub deleted: u64,

    /// Renames paired inside the watched trees
    pub renamed: u64,

    /// Subtrees dropped after moving out of scope
    pub moved_out: u64,

    /// Events for ids already on their way out
    pub stale: u64,

    pub overflows: u64,

    /// Full rebuilds, for any reason
    pub rebuilds: u64,

    pub roots_retired: u64,
}

/// Keeps a `WatchCache` in step with the kernel's event stream
pub struct Reconciler<W: KernelWatcher> {
    pub(crate) watcher: W,
    pub(crate) cache: WatchCache,
    pub(crate) roots: RootSet,
    pub(crate) moves: PendingMoves,

    /// Ids removed by us or announced gone, awaiting `Ignored`
    pub(crate) draining: HashSet<WatchId>,

    pub(crate) policy: Policy,
    pub(crate) stats: ReconcileStats,
}

impl<W: KernelWatcher> Reconciler<W> {
    /// Create a reconciler; nothing is watched until `start`
    pub fn new(watcher: W, roots: RootSet, policy: Policy) -> Self {
        Self {
            watcher,
            cache: WatchCache::new(),
            roots,
            moves: PendingMoves::new(),
            draining: HashSet::new(),
            policy,
            stats: ReconcileStats::default(),
        }
    }

    /// Watch every directory below every root
    pub fn start(&mut self) -> Result<Flow> {
        let watched = self.build()?;
        tracing::info!(
            "watching {} directories under {} roots",
            watched,
            self.roots.live_count()
        );
        Ok(self.flow())
    }

    /// Apply one event to the cache
    pub fn handle_event(&mut self, event: Event) -> Result<Flow> {
        self.stats.events += 1;
        tracing::debug!(
            target: targets::EVENTS,
            "watch {} {:?}{} cookie {:?} name {:?}",
            event.watch_id,
            event.kind,
            if event.is_dir { " (dir)" } else { "" },
            event.cookie,
            event.name
        );

        // Anything but the partner of a pending rename ends the pairing window
        if !self.moves.is_empty() && !self.completes_pending_move(&event) {
            self.expire_pending_moves();
        }

        if self.is_draining(&event) {
            self.stats.stale += 1;
            tracing::debug!(
                target: targets::EVENTS,
                "watch {} is being removed, ignoring {:?}",
                event.watch_id,
                event.kind
            );
            return Ok(self.flow());
        }

        match event.kind {
            EventKind::Create => self.on_create(&event)?,
            EventKind::DeleteSelf => self.on_delete_self(&event),
            EventKind::MoveSelf => self.on_move_self(&event),
            EventKind::MovedFrom => self.on_moved_from(&event)?,
            EventKind::MovedTo => self.on_moved_to(&event)?,
            EventKind::Overflow => self.on_overflow()?,
            EventKind::Ignored => self.on_ignored(&event),
            EventKind::Unmount => self.on_unmount(&event),
            EventKind::Other => {}
        }

        Ok(self.flow())
    }

    /// Treat every unpaired rename half as a move out of scope
    ///
    /// Returns the number of expired moves.
    pub fn expire_pending_moves(&mut self) -> usize {
        let expired = self.moves.drain();
        let count = expired.len();
        for pending in expired {
            self.move_out(pending);
        }
        count
    }

    pub fn has_pending_moves(&self) -> bool {
        !self.moves.is_empty()
    }

    /// Time left before the oldest pending rename half expires
    ///
    /// `None` when no rename is pending.
    pub fn rename_wait(&self, window: Duration) -> Option<Duration> {
        self.moves
            .oldest()
            .map(|since| window.saturating_sub(since.elapsed()))
    }

    /// Run the consistency checker, resolving divergence per policy
    pub fn check(&mut self) -> Result<CheckReport> {
        let report = check_cache(&self.cache);
        if report.is_divergent() {
            self.cache_problem(report.describe())?;
        }
        Ok(report)
    }

    /// Watch id cached for `path`
    pub fn lookup(&self, path: &Path) -> Option<WatchId> {
        self.cache
            .path_to_slot(path)
            .and_then(|slot| self.cache.entry(slot))
            .map(|entry| entry.watch_id())
    }

    pub fn cache(&self) -> &WatchCache {
        &self.cache
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    pub fn watcher(&self) -> &W {
        &self.watcher
    }

    pub fn watcher_mut(&mut self) -> &mut W {
        &mut self.watcher
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Whether any root is still live
    pub fn flow(&self) -> Flow {
        if self.roots.live_count() == 0 {
            Flow::RootsExhausted
        } else {
            Flow::Continue
        }
    }

    fn completes_pending_move(&self, event: &Event) -> bool {
        event.kind == EventKind::MovedTo
            && event.cookie.is_some_and(|cookie| self.moves.contains(cookie))
    }

    fn is_draining(&self, event: &Event) -> bool {
        !matches!(event.kind, EventKind::Ignored | EventKind::Overflow)
            && self.draining.contains(&event.watch_id)
    }

    /// Slot for an event's watch, where absence is a cache problem
    ///
    /// `Ok(None)` means the problem was handled by rebuilding and the event
    /// has nothing left to apply.
    fn lookup_checked(&mut self, watch_id: WatchId) -> Result<Option<Slot>> {
        match self.cache.find_checked(watch_id) {
            Ok(slot) => Ok(Some(slot)),
            Err(e) => {
                self.cache_problem(e.to_string())?;
                Ok(None)
            }
        }
    }

    /// Path of the directory named by an event on its parent's watch
    fn child_path(&mut self, event: &Event) -> Result<Option<PathBuf>> {
        let Some(name) = event.name() else {
            tracing::warn!(
                "{:?} on watch {} carries no name, ignoring",
                event.kind,
                event.watch_id
            );
            return Ok(None);
        };

        let Some(slot) = self.lookup_checked(event.watch_id)? else {
            return Ok(None);
        };

        Ok(self.cache.entry(slot).map(|parent| parent.path().join(name)))
    }

    /// Escalate or rebuild, per policy
    pub(crate) fn cache_problem(&mut self, reason: String) -> Result<()> {
        if self.policy.abort_on_cache_problem {
            return Err(WatchError::Divergence(reason));
        }

        tracing::warn!("{}; rebuilding the cache", reason);
        self.rebuild()?;
        Ok(())
    }

    fn on_create(&mut self, event: &Event) -> Result<()> {
        if !event.is_dir {
            return Ok(());
        }
        let Some(path) = self.child_path(event)? else {
            return Ok(());
        };

        let watched = self.watch_subtree(&path)?;
        if watched > 0 {
            self.stats.created += 1;
        }
        Ok(())
    }

    fn on_delete_self(&mut self, event: &Event) {
        self.draining.insert(event.watch_id);

        let Some(slot) = self.cache.find(event.watch_id) else {
            tracing::debug!(
                target: targets::CACHE,
                "deleted watch {} is not cached",
                event.watch_id
            );
            return;
        };

        if let Some(path) = self.remove_slot(slot) {
            self.stats.deleted += 1;
            self.retire_if_root(&path);
        }
    }

    fn on_move_self(&mut self, event: &Event) {
        let Some(path) = self
            .cache
            .find(event.watch_id)
            .and_then(|slot| self.cache.entry(slot))
            .map(|entry| entry.path().to_path_buf())
        else {
            return;
        };

        // Renames below a root are handled from the parent's events
        if self.roots.is_root(&path) {
            self.retire_if_root(&path);
            self.drop_subtree(&path);
        }
    }

    fn on_moved_from(&mut self, event: &Event) -> Result<()> {
        if !event.is_dir {
            return Ok(());
        }
        let Some(old_path) = self.child_path(event)? else {
            return Ok(());
        };

        let Some(cookie) = event.cookie else {
            self.drop_moved_out(&old_path);
            return Ok(());
        };

        tracing::debug!(
            target: targets::RENAMES,
            "cookie {}: {} left watch {}",
            cookie,
            old_path.display(),
            event.watch_id
        );
        if let Some(superseded) = self.moves.insert(cookie, event.watch_id, old_path) {
            self.move_out(superseded);
        }
        Ok(())
    }

    fn on_moved_to(&mut self, event: &Event) -> Result<()> {
        if !event.is_dir {
            return Ok(());
        }
        let Some(new_path) = self.child_path(event)? else {
            return Ok(());
        };

        match event.cookie.and_then(|cookie| self.moves.take(cookie)) {
            Some(pending) => self.rename(&pending.old_path, &new_path)?,
            None => {
                tracing::debug!(
                    target: targets::RENAMES,
                    "{} moved in from outside the watched trees",
                    new_path.display()
                );
                let watched = self.watch_subtree(&new_path)?;
                if watched > 0 {
                    self.stats.created += 1;
                }
            }
        }
        Ok(())
    }

    fn rename(&mut self, old: &Path, new: &Path) -> Result<()> {
        self.stats.renamed += 1;

        // The entry at `old` may already belong to a directory created there
        // after the move; only rewrite it if it is the object now at `new`
        let cached = self.lookup(old);
        let Some(moved) = self.add_watch(new)? else {
            tracing::debug!(
                target: targets::RENAMES,
                "rename {} -> {}: destination is already gone",
                old.display(),
                new.display()
            );
            if cached.is_some() {
                self.cache.rewrite_prefix(old, new);
                self.retire_if_root(old);
            }
            return Ok(());
        };

        if cached == Some(moved) {
            let rewritten = self.cache.rewrite_prefix(old, new);
            tracing::debug!(
                target: targets::RENAMES,
                "renamed {} -> {} ({} entries)",
                old.display(),
                new.display(),
                rewritten
            );
            self.retire_if_root(old);
            return Ok(());
        }

        tracing::debug!(
            target: targets::RENAMES,
            "{} is not the directory renamed to {}, watching the destination afresh",
            old.display(),
            new.display()
        );
        self.watch_subtree(new)?;
        Ok(())
    }

    fn on_overflow(&mut self) -> Result<()> {
        self.stats.overflows += 1;
        tracing::warn!("kernel event queue overflowed");

        match self.policy.overflow {
            OverflowStrategy::Abort => Err(WatchError::Divergence(
                "kernel event queue overflowed".to_string(),
            )),
            OverflowStrategy::Rescan => {
                self.rebuild()?;
                Ok(())
            }
        }
    }

    fn on_ignored(&mut self, event: &Event) {
        self.draining.remove(&event.watch_id);

        if let Some(slot) = self.cache.find(event.watch_id) {
            if let Some(path) = self.remove_slot(slot) {
                self.retire_if_root(&path);
            }
        }
    }

    fn on_unmount(&mut self, event: &Event) {
        self.draining.insert(event.watch_id);

        let Some(path) = self
            .cache
            .find(event.watch_id)
            .and_then(|slot| self.cache.entry(slot))
            .map(|entry| entry.path().to_path_buf())
        else {
            return;
        };

        tracing::info!("file system under {} was unmounted", path.display());
        self.drop_subtree(&path);
    }

    fn move_out(&mut self, pending: PendingMove) {
        tracing::debug!(
            target: targets::RENAMES,
            "cookie {}: no partner for {} (left watch {})",
            pending.cookie,
            pending.old_path.display(),
            pending.parent
        );
        self.drop_moved_out(&pending.old_path);
    }

    fn drop_moved_out(&mut self, path: &Path) {
        let dropped = self.drop_subtree(path);
        self.stats.moved_out += 1;
        tracing::debug!(
            target: targets::RENAMES,
            "{} moved out of scope ({} entries dropped)",
            path.display(),
            dropped
        );
    }

    /// Free a slot, returning the path it held
    pub(crate) fn remove_slot(&mut self, slot: Slot) -> Option<PathBuf> {
        let path = self.cache.entry(slot)?.path().to_path_buf();
        self.cache.remove(slot);
        Some(path)
    }

    /// Retire `path` if it is a live root
    pub(crate) fn retire_if_root(&mut self, path: &Path) {
        match self.roots.retire(path) {
            RootStatus::NotARoot => {}
            RootStatus::Remaining(_) => self.stats.roots_retired += 1,
            RootStatus::Exhausted => {
                self.stats.roots_retired += 1;
                tracing::info!("all roots have been retired");
            }
        }
    }
}
