//! Pending rename halves
//!
//! A rename shows up as a `MovedFrom` on the old parent followed by a
//! `MovedTo` on the new parent, both carrying the same cookie. The first half
//! is parked here until its partner arrives. If anything else arrives first,
//! or the pairing window passes, the directory left the watched scope.

use dtree_core::WatchId;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::time::Instant;

/// First half of a rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub cookie: u32,

    /// Watch of the directory the entry left
    pub parent: WatchId,

    /// Full path before the move
    pub old_path: PathBuf,

    /// When the `MovedFrom` was handled
    pub since: Instant,

    /// Arrival order among pending moves
    sequence: u64,
}

/// Unpaired `MovedFrom` events keyed by cookie
#[derive(Debug, Default)]
pub struct PendingMoves {
    pending: HashMap<u32, PendingMove>,
    next_sequence: u64,
}

impl PendingMoves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a `MovedFrom`, returning any earlier move with the same cookie
    pub fn insert(&mut self, cookie: u32, parent: WatchId, old_path: PathBuf) -> Option<PendingMove> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(
            cookie,
            PendingMove {
                cookie,
                parent,
                old_path,
                since: Instant::now(),
                sequence,
            },
        )
    }

    /// Claim the move matching `cookie`
    pub fn take(&mut self, cookie: u32) -> Option<PendingMove> {
        self.pending.remove(&cookie)
    }

    pub fn contains(&self, cookie: u32) -> bool {
        self.pending.contains_key(&cookie)
    }

    /// Arrival time of the longest-waiting move
    pub fn oldest(&self) -> Option<Instant> {
        self.pending.values().map(|m| m.since).min()
    }

    /// Remove every pending move, oldest first
    pub fn drain(&mut self) -> Vec<PendingMove> {
        let mut moves: Vec<PendingMove> = self.pending.drain().map(|(_, m)| m).collect();
        moves.sort_by_key(|m| m.sequence);
        moves
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
