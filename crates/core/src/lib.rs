//! Core data model for dtree
//!
//! This crate provides:
//! - The watch cache (watch id -> directory path, slot recycling)
//! - The root set (top-level directories, identity checks, retirement)
//! - The structural event model fed by the kernel adapter
//! - Configuration and the verbosity mask used by the logging layer

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod roots;
pub mod verbosity;

// Re-exports
pub use cache::{Slot, WatchCache, WatchEntry, WatchId};
pub use config::{DtreeConfig, OverflowStrategy};
pub use error::{CacheError, RootError};
pub use event::{Event, EventKind};
pub use roots::{RootSet, RootStatus};
pub use verbosity::Verbosity;
