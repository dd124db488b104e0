//! Directory-tree watching for dtree
//!
//! This crate keeps a `WatchCache` consistent with the directory trees below
//! a set of roots:
//! - Kernel event sources (inotify, plus an in-memory source for replay)
//! - Event reconciliation with rename pairing
//! - Subtree walks, full rebuilds and overflow recovery
//! - Consistency checks and the escape hatch
//! - The monitor loop tying them together

pub mod check;
pub mod error;
pub mod escape;
pub mod monitor;
pub mod moves;
pub mod platform;
pub mod reconcile;
mod rescan;

pub use check::{check_cache, CheckReport};
pub use error::{Result, WatchError};
pub use escape::{dump_to_log, EscapeHatch};
pub use monitor::{Command, Monitor, MonitorOptions, Outcome};
pub use moves::{PendingMove, PendingMoves};
pub use platform::{KernelWatcher, MemoryWatcher, WatcherDiagnostics};
pub use reconcile::{Flow, Policy, ReconcileStats, Reconciler};
pub use rescan::Watched;

#[cfg(target_os = "linux")]
pub use platform::InotifyWatcher;
