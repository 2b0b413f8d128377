//! Vector clock: per-node high-water marks of incorporated operations.
//!
//! Serves two roles. Inside an instance it records the highest Lamport
//! timestamp already incorporated from each node, which makes re-delivery
//! of delta entries idempotent. Inside the sync engine one clock per
//! `(instance, peer)` pair is the sole basis for delta computation, and is
//! advanced only after a successful merge is acknowledged.
//!
//! # Examples
//!
//! ```
//! use meld_crdt::VectorClock;
//! use meld_core::NodeId;
//!
//! let a = NodeId::new("node-a");
//! let mut clock = VectorClock::new();
//! clock.increment(&a);
//! clock.increment(&a);
//! assert_eq!(clock.get(&a), 2);
//! ```

use meld_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mapping from node identity to the highest logical timestamp seen from
/// that node. Merge = pointwise max.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: HashMap<NodeId, u64>,
}

impl VectorClock {
    /// Create an empty clock (all nodes implicitly at 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance this node's entry by one and return the new value.
    pub fn increment(&mut self, node: &NodeId) -> u64 {
        let entry = self.entries.entry(node.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Record that `seq` from `node` has been incorporated. Monotonic:
    /// never moves an entry backwards.
    pub fn observe(&mut self, node: &NodeId, seq: u64) {
        let entry = self.entries.entry(node.clone()).or_insert(0);
        *entry = (*entry).max(seq);
    }

    /// The highest timestamp seen from `node` (0 if never seen).
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// All nodes this clock holds an entry for.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    /// Merge with another clock: pointwise max per node.
    pub fn merge(&mut self, other: &Self) {
        for (node, &seq) in &other.entries {
            self.observe(node, seq);
        }
    }

    /// True if every entry in `other` is at most the matching entry here
    /// and at least one entry is strictly greater. Strict domination.
    pub fn dominates(&self, other: &Self) -> bool {
        let mut strictly_greater = false;
        for (node, &other_seq) in &other.entries {
            let self_seq = self.get(node);
            if self_seq < other_seq {
                return false;
            }
        }
        for (node, &self_seq) in &self.entries {
            if self_seq > other.get(node) {
                strictly_greater = true;
            }
        }
        strictly_greater
    }

    /// True if neither clock dominates the other and they differ:
    /// the histories are concurrent.
    pub fn concurrent(&self, other: &Self) -> bool {
        self != other && !self.dominates(other) && !other.dominates(self)
    }

    /// Pointwise minimum across a set of clocks. The floor below which
    /// every peer has advanced; the causal gate for compaction. Nodes
    /// absent from any clock floor to 0.
    pub fn floor<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> VectorClock {
        let mut iter = clocks.into_iter();
        let Some(first) = iter.next() else {
            return VectorClock::new();
        };
        let mut entries = first.entries.clone();
        for clock in iter {
            for (node, seq) in entries.iter_mut() {
                *seq = (*seq).min(clock.get(node));
            }
            // Nodes the current clock has never seen floor to 0.
            entries.retain(|node, seq| *seq > 0 || clock.get(node) > 0);
        }
        VectorClock { entries }
    }
}
