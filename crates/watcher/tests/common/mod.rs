//! Common utilities for reconciler tests
//!
//! A `Fixture` is a real directory tree in a temp dir watched through a
//! `MemoryWatcher`. Tests change the tree on disk, then feed the events the
//! kernel would have produced.

#![allow(dead_code)]

use dtree_core::{Event, EventKind, RootSet, WatchId};
use dtree_watcher::{
    Command, EscapeHatch, MemoryWatcher, Monitor, MonitorOptions, Outcome, Policy, Reconciler,
    Result,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub struct Fixture {
    /// Keeps the tree alive
    pub temp_dir: TempDir,

    /// Canonical path of the temp dir
    pub base: PathBuf,

    pub reconciler: Reconciler<MemoryWatcher>,
}

impl Fixture {
    /// One root named `root`; `dirs` are relative to the temp dir
    pub fn new(dirs: &[&str]) -> Self {
        Self::with_roots(&["root"], dirs, Policy::default())
    }

    /// One root named `root`, with `policy`
    pub fn with_policy(dirs: &[&str], policy: Policy) -> Self {
        Self::with_roots(&["root"], dirs, policy)
    }

    /// Several roots below the temp dir
    pub fn with_roots(roots: &[&str], dirs: &[&str], policy: Policy) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let base = fs::canonicalize(temp_dir.path()).unwrap();

        for root in roots {
            fs::create_dir_all(base.join(root)).unwrap();
        }
        for dir in dirs {
            fs::create_dir_all(base.join(dir)).unwrap();
        }

        let root_paths: Vec<PathBuf> = roots.iter().map(|r| base.join(r)).collect();
        let roots = RootSet::initialize(&root_paths).unwrap();
        let mut reconciler = Reconciler::new(MemoryWatcher::new(), roots, policy);
        reconciler.start().unwrap();

        Self {
            temp_dir,
            base,
            reconciler,
        }
    }

    /// Absolute path of `relative` below the temp dir
    pub fn path(&self, relative: &str) -> PathBuf {
        self.base.join(relative)
    }

    /// Watch id cached for `relative`
    pub fn id(&self, relative: &str) -> WatchId {
        self.reconciler
            .lookup(&self.path(relative))
            .unwrap_or_else(|| panic!("{} is not cached", relative))
    }

    /// Cached paths relative to the temp dir, sorted
    pub fn cached(&self) -> Vec<String> {
        cached_paths(&self.reconciler, &self.base)
    }

    pub fn is_cached(&self, relative: &str) -> bool {
        self.reconciler.lookup(&self.path(relative)).is_some()
    }

    pub fn mkdir(&self, relative: &str) {
        fs::create_dir(self.path(relative)).unwrap();
    }

    pub fn rmdir(&self, relative: &str) {
        fs::remove_dir(self.path(relative)).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.path(from), self.path(to)).unwrap();
    }

    /// Apply one event directly
    pub fn handle(&mut self, event: Event) -> Result<dtree_watcher::Flow> {
        self.reconciler.handle_event(event)
    }

    /// Queue an event for the monitor
    pub fn push(&mut self, event: Event) {
        self.reconciler.watcher_mut().push(event);
    }

    /// Apply every queued event (including `Ignored` for removed watches)
    pub async fn drain(&mut self) -> Result<()> {
        while self.reconciler.watcher().queued() > 0 {
            let event = dtree_watcher::KernelWatcher::next_event(self.reconciler.watcher_mut())
                .await?
                .expect("queued event");
            self.reconciler.handle_event(event)?;
        }
        Ok(())
    }

    /// Run a monitor over the fixture, feeding it `commands`
    pub async fn monitor(
        self,
        options: MonitorOptions,
        commands: Vec<Command>,
    ) -> (Result<Outcome>, Monitor<MemoryWatcher>, TempDir) {
        let (tx, rx) = mpsc::channel(commands.len().max(1));
        for command in commands {
            tx.send(command).await.unwrap();
        }
        drop(tx);

        let mut monitor = Monitor::new(self.reconciler, EscapeHatch::default(), options);
        let outcome = monitor.run_until_divergence(rx).await;
        (outcome, monitor, self.temp_dir)
    }
}

/// Directory created below `parent`
pub fn create(parent: WatchId, name: &str) -> Event {
    Event::on_child(parent, EventKind::Create, name, true)
}

/// First half of a rename
pub fn moved_from(parent: WatchId, name: &str, cookie: u32) -> Event {
    Event::on_child(parent, EventKind::MovedFrom, name, true).with_cookie(cookie)
}

/// Second half of a rename
pub fn moved_to(parent: WatchId, name: &str, cookie: u32) -> Event {
    Event::on_child(parent, EventKind::MovedTo, name, true).with_cookie(cookie)
}

pub fn delete_self(watch_id: WatchId) -> Event {
    Event::on_watch(watch_id, EventKind::DeleteSelf)
}

pub fn move_self(watch_id: WatchId) -> Event {
    Event::on_watch(watch_id, EventKind::MoveSelf)
}

pub fn ignored(watch_id: WatchId) -> Event {
    Event::on_watch(watch_id, EventKind::Ignored)
}

/// Paths of every cached entry, relative to `base`, sorted
pub fn cached_paths(reconciler: &Reconciler<MemoryWatcher>, base: &Path) -> Vec<String> {
    let mut paths: Vec<String> = reconciler
        .cache()
        .iter()
        .map(|(_, entry)| {
            entry
                .path()
                .strip_prefix(base)
                .unwrap()
                .display()
                .to_string()
        })
        .collect();
    paths.sort();
    paths
}
