//! Last-writer-wins register (LWW-Register) CRDT.
//!
//! Each write carries a timestamp and the writer's node id. Merge keeps
//! the entry with the greater `(timestamp, node_id)` lexicographic pair;
//! the node id is the deterministic tie-break when timestamps coincide.
//!
//! Timestamps are wall-clock (`DateTime<Utc>`), not Lamport counters.
//! This is a deliberate choice matching the documented tie-break
//! behavior; it makes the register sensitive to clock skew between
//! nodes, which callers accepting last-writer-wins semantics already
//! tolerate. This is a lossy type: concurrent writes silently discard
//! all but one value. The conflict resolver records the discards.
//!
//! # Examples
//!
//! ```
//! use meld_crdt::LWWRegister;
//! use meld_core::NodeId;
//! use chrono::Utc;
//!
//! let t = Utc::now();
//! let mut a = LWWRegister::new("x".to_string(), t, NodeId::new("A"));
//! let b = LWWRegister::new("y".to_string(), t, NodeId::new("B"));
//!
//! a.merge(&b);
//! // Equal timestamps: "B" > "A", so b's value wins everywhere.
//! assert_eq!(a.get(), "y");
//! ```

use chrono::{DateTime, Utc};
use meld_core::NodeId;
use serde::{Deserialize, Serialize};

/// A last-writer-wins register. The value with the highest
/// `(timestamp, node_id)` pair wins on merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LWWRegister<T> {
    value: T,
    timestamp: DateTime<Utc>,
    node: NodeId,
}

impl<T: Clone> LWWRegister<T> {
    /// Create a register holding an initial value.
    pub fn new(value: T, timestamp: DateTime<Utc>, node: NodeId) -> Self {
        Self {
            value,
            timestamp,
            node,
        }
    }

    /// Write a value only if `(timestamp, node)` beats the current pair.
    pub fn set(&mut self, value: T, timestamp: DateTime<Utc>, node: NodeId) {
        if (timestamp, &node) > (self.timestamp, &self.node) {
            self.value = value;
            self.timestamp = timestamp;
            self.node = node;
        }
    }

    /// The current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Timestamp of the current value.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Writer of the current value.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Merge: keep the higher `(timestamp, node)` pair.
    ///
    /// Deterministic even with synchronized clocks thanks to the
    /// lexicographic node tie-break.
    pub fn merge(&mut self, other: &Self) {
        if (other.timestamp, &other.node) > (self.timestamp, &self.node) {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
            self.node = other.node.clone();
        }
    }
}

impl<T: Clone + Default> Default for LWWRegister<T> {
    /// An empty register at the epoch: any real write beats it.
    fn default() -> Self {
        Self {
            value: T::default(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            node: NodeId::new(""),
        }
    }
}

impl<T: Clone + PartialEq> PartialEq for LWWRegister<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.timestamp == other.timestamp
            && self.node == other.node
    }
}

impl<T: Clone + Eq> Eq for LWWRegister<T> {}
