//! Append-only operation log powering delta sync.
//!
//! One entry per accepted local mutation: the unit the sync engine
//! ships to peers. Entries are never mutated or reordered in place;
//! compaction may only drop a prefix that every known peer has already
//! incorporated (the causal gate).

use meld_core::{NodeId, OpId};
use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::op::CrdtOp;

/// A record of one logical mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpLogEntry {
    /// The instance the mutation applies to.
    pub crdt_name: String,
    /// The replayable effect.
    pub op: CrdtOp,
    /// Node where the mutation originated.
    pub origin: NodeId,
    /// Per-node Lamport counter at the origin, monotonically increasing.
    /// Not wall-clock time; the LWW register keeps its own wall-clock
    /// stamp inside the op payload.
    pub lamport: u64,
    /// Globally unique operation id.
    pub op_id: OpId,
}

/// Append-only log of one instance's accepted mutations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpLog {
    entries: Vec<OpLogEntry>,
}

impl OpLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries arrive in local acceptance order.
    pub fn append(&mut self, entry: OpLogEntry) {
        self.entries.push(entry);
    }

    /// Entries the given clock has not yet incorporated: those whose
    /// `(origin, lamport)` exceeds the clock's record for the origin.
    /// This bounds sync to true novelty; a clock equal to local state
    /// yields zero entries.
    pub fn entries_since(&self, clock: &VectorClock) -> Vec<OpLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.lamport > clock.get(&e.origin))
            .cloned()
            .collect()
    }

    /// Drop entries at or below `floor` for their origin. Safe only when
    /// `floor` is the pointwise minimum of every known peer's clock.
    /// Returns the number of entries dropped.
    pub fn compact(&mut self, floor: &VectorClock) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.lamport > floor.get(&e.origin));
        before - self.entries.len()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[OpLogEntry] {
        &self.entries
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entry is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
