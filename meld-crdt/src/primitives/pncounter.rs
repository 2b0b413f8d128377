//! Positive-negative counter (PN-Counter) CRDT.
//!
//! A pair of G-Counters: one for increments, one for decrements.
//! `value()` is their difference, so it can go negative.
//!
//! # Examples
//!
//! ```
//! use meld_crdt::PNCounter;
//! use meld_core::NodeId;
//!
//! let node = NodeId::new("node-a");
//! let mut c = PNCounter::new();
//! c.increment(&node, 10);
//! c.decrement(&node, 4);
//! assert_eq!(c.value(), 6);
//! ```

use super::GCounter;
use meld_core::NodeId;
use serde::{Deserialize, Serialize};

/// A counter supporting both increment and decrement, built from two
/// grow-only counters. Merge = componentwise G-Counter merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter {
    positive: GCounter,
    negative: GCounter,
}

impl PNCounter {
    /// Create a new counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the given node's positive slot.
    pub fn increment(&mut self, node: &NodeId, amount: u64) {
        self.positive.increment(node, amount);
    }

    /// Add `amount` to the given node's negative slot.
    pub fn decrement(&mut self, node: &NodeId, amount: u64) {
        self.negative.increment(node, amount);
    }

    /// Current value: positive total minus negative total.
    pub fn value(&self) -> i64 {
        self.positive.value() as i64 - self.negative.value() as i64
    }

    /// Merge with another PN-Counter: merge both halves.
    pub fn merge(&mut self, other: &Self) {
        self.positive.merge(&other.positive);
        self.negative.merge(&other.negative);
    }
}
