//! Operation model: user intents and replayable effects.
//!
//! A caller submits a [`Mutation`] (intent). The owning instance
//! validates it and turns it into a [`CrdtOp`] (effect): the op carries
//! everything minted at the origin — add tags, observed tombstones,
//! wall-clock stamps — so that replaying it on any other replica is
//! deterministic and produces the same state. Effects are what the
//! operation log stores and the wire carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::primitives::AddTag;
use crate::specialized::graph::EdgeRemoval;
use crate::specialized::time_series::Sample;

/// What a caller asks for. Validation happens against local state before
/// any mutation; a rejected intent leaves the instance untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Mutation {
    /// Counter increment (G-Counter, PN-Counter).
    Increment { amount: u64 },
    /// Counter decrement (PN-Counter only).
    Decrement { amount: u64 },
    /// Set insert (G-Set, OR-Set).
    Add { element: String },
    /// Observed remove (OR-Set only).
    Remove { element: String },
    /// Register write (LWW-Register).
    Write { value: Value },
    /// Time-series append.
    Append {
        timestamp: DateTime<Utc>,
        value: f64,
        metadata: Value,
    },
    /// Graph vertex insert, with optional attached data.
    AddVertex { id: String, data: Option<Value> },
    /// Graph vertex removal; cascades to incident edges.
    RemoveVertex { id: String },
    /// Graph edge insert, with optional attached data.
    AddEdge {
        source: String,
        target: String,
        data: Option<Value>,
    },
    /// Graph edge removal.
    RemoveEdge { source: String, target: String },
    /// Workflow transition.
    TransitionTo { state: String, data: Value },
}

/// The logged, replayable effect of one accepted mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CrdtOp {
    Increment {
        amount: u64,
    },
    Decrement {
        amount: u64,
    },
    /// Set insert. The tag was minted at the origin; G-Set ignores it.
    Add {
        element: String,
        tag: AddTag,
    },
    /// Tombstones exactly the tags visible at the origin.
    Remove {
        element: String,
        tags: HashSet<AddTag>,
    },
    /// LWW write, stamped with the origin's wall clock.
    Write {
        value: Value,
        timestamp: DateTime<Utc>,
    },
    /// Time-series append, with any origin-side evictions folded in so
    /// bounded series stay merge-safe.
    Append {
        sample: Sample,
        tag: AddTag,
        evicted: Vec<(Uuid, HashSet<AddTag>)>,
    },
    AddVertex {
        id: String,
        data: Option<Value>,
        tag: AddTag,
        timestamp: DateTime<Utc>,
    },
    /// Vertex removal with the cascaded edge removals observed at the
    /// origin.
    RemoveVertex {
        id: String,
        tags: HashSet<AddTag>,
        edges: Vec<EdgeRemoval>,
    },
    AddEdge {
        source: String,
        target: String,
        data: Option<Value>,
        tag: AddTag,
        timestamp: DateTime<Utc>,
    },
    RemoveEdge {
        source: String,
        target: String,
        tags: HashSet<AddTag>,
    },
    /// Workflow transition accepted at the origin. `from` is what the
    /// origin transitioned out of; kept for the history record.
    TransitionTo {
        state: String,
        data: Value,
        from: String,
        timestamp: DateTime<Utc>,
    },
}

impl CrdtOp {
    /// Short label for logs and conflict records.
    pub fn kind_label(&self) -> &'static str {
        match self {
            CrdtOp::Increment { .. } => "increment",
            CrdtOp::Decrement { .. } => "decrement",
            CrdtOp::Add { .. } => "add",
            CrdtOp::Remove { .. } => "remove",
            CrdtOp::Write { .. } => "write",
            CrdtOp::Append { .. } => "append",
            CrdtOp::AddVertex { .. } => "add_vertex",
            CrdtOp::RemoveVertex { .. } => "remove_vertex",
            CrdtOp::AddEdge { .. } => "add_edge",
            CrdtOp::RemoveEdge { .. } => "remove_edge",
            CrdtOp::TransitionTo { .. } => "transition_to",
        }
    }
}
