//! Grow-only counter (G-Counter) CRDT.
//!
//! Each node maintains its own slot. The total value is the sum of all
//! slots. Merge takes the per-node maximum. Never decreases.
//!
//! # Examples
//!
//! ```
//! use meld_crdt::GCounter;
//! use meld_core::NodeId;
//!
//! let a_id = NodeId::new("node-a");
//! let b_id = NodeId::new("node-b");
//!
//! let mut a = GCounter::new();
//! a.increment(&a_id, 5);
//!
//! let mut b = GCounter::new();
//! b.increment(&b_id, 3);
//!
//! a.merge(&b);
//! b.merge(&a);
//! assert_eq!(a.value(), 8);
//! assert_eq!(b.value(), 8);
//! ```

use meld_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A grow-only counter where each node owns a monotonically increasing
/// slot. Merge = per-node max. Value = sum of all slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    /// Node ID → that node's slot.
    counts: HashMap<NodeId, u64>,
}

impl GCounter {
    /// Create a new empty G-Counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the given node's slot.
    pub fn increment(&mut self, node: &NodeId, amount: u64) {
        let entry = self.counts.entry(node.clone()).or_insert(0);
        *entry += amount;
    }

    /// Total value: sum of all node slots.
    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    /// The slot for a specific node.
    pub fn node_value(&self, node: &NodeId) -> u64 {
        self.counts.get(node).copied().unwrap_or(0)
    }

    /// Merge with another G-Counter: per-node max.
    ///
    /// Convergence guarantee: monotonically increasing, no lost
    /// increments. `merge(a, b).value() >= max(a.value(), b.value())`.
    pub fn merge(&mut self, other: &Self) {
        for (node, &other_val) in &other.counts {
            let entry = self.counts.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(other_val);
        }
    }
}
