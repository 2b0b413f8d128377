//! Workflow / state-machine CRDT.
//!
//! Current state lives in an LWW-Register; the transition history is a
//! grow-only set of records. A transition is rejected locally, with no
//! mutation, when the target is not reachable from the current state
//! under the transition table.
//!
//! Transitions can race across nodes: merge can land on a state neither
//! node locally chose. That is expected, covered by tests, and flagged
//! by the conflict resolver. Callers needing strict sequencing must use
//! external coordination, not this type.

use chrono::{DateTime, Utc};
use meld_core::{CrdtError, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::primitives::{GSet, LWWRegister};

/// One recorded transition. Identity is `(from, to, timestamp, node)`;
/// the attached data rides along and is excluded from identity, since a
/// replayed op always carries the same data under the same stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub node: NodeId,
}

impl PartialEq for TransitionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.timestamp == other.timestamp
            && self.node == other.node
    }
}

impl Eq for TransitionRecord {}

impl Hash for TransitionRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.from.hash(state);
        self.to.hash(state);
        self.timestamp.hash(state);
        self.node.hash(state);
    }
}

/// A small state machine with conflict-free replicated history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// from-state → allowed target states. Static per workflow; merged
    /// by union so identical tables stay identical.
    transitions: HashMap<String, HashSet<String>>,
    current: LWWRegister<String>,
    history: GSet<TransitionRecord>,
}

impl Workflow {
    /// Create a workflow sitting in `initial` with the given transition
    /// table. The initial state is stamped at the epoch so any real
    /// transition beats it.
    pub fn new(initial: impl Into<String>, transitions: HashMap<String, HashSet<String>>) -> Self {
        Self {
            transitions,
            current: LWWRegister::new(
                initial.into(),
                DateTime::<Utc>::UNIX_EPOCH,
                NodeId::new(""),
            ),
            history: GSet::new(),
        }
    }

    /// The current state.
    pub fn current_state(&self) -> &str {
        self.current.get()
    }

    /// Whether `to` is reachable from the current state in one step.
    pub fn can_transition(&self, to: &str) -> bool {
        self.transitions
            .get(self.current.get())
            .is_some_and(|targets| targets.contains(to))
    }

    /// Transition into `state`. Rejected with no mutation when `state`
    /// is not reachable from the current state.
    pub fn transition_to(
        &mut self,
        state: impl Into<String>,
        data: Value,
        node: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, CrdtError> {
        let state = state.into();
        if !self.can_transition(&state) {
            return Err(CrdtError::InvalidTransition {
                from: self.current.get().clone(),
                to: state,
            });
        }
        let from = self.current.get().clone();
        let record = TransitionRecord {
            from,
            to: state,
            data,
            timestamp: now,
            node: node.clone(),
        };
        self.apply_transition(&record);
        Ok(record)
    }

    /// Replay a transition accepted at its origin. No reachability
    /// re-check: the origin validated against its own current state,
    /// and refusing a valid replay would break convergence.
    pub fn apply_transition(&mut self, record: &TransitionRecord) {
        self.current
            .set(record.to.clone(), record.timestamp, record.node.clone());
        self.history.add(record.clone());
    }

    /// Full transition history, ordered by `(timestamp, node)`.
    pub fn history(&self) -> Vec<&TransitionRecord> {
        let mut records: Vec<&TransitionRecord> = self.history.iter().collect();
        records.sort_by(|a, b| (a.timestamp, &a.node).cmp(&(b.timestamp, &b.node)));
        records
    }

    /// Transitions out of the current state that raced: more than one
    /// recorded departure from the same state by different nodes. Used
    /// by the conflict resolver.
    pub fn concurrent_departures(&self, from: &str) -> Vec<&TransitionRecord> {
        let mut departures: Vec<&TransitionRecord> = self
            .history
            .iter()
            .filter(|r| r.from == from)
            .collect();
        departures.sort_by(|a, b| (a.timestamp, &a.node).cmp(&(b.timestamp, &b.node)));
        departures
    }

    /// Merge: LWW on the current state, union on history and table.
    pub fn merge(&mut self, other: &Self) {
        self.current.merge(&other.current);
        self.history.merge(&other.history);
        for (from, targets) in &other.transitions {
            self.transitions
                .entry(from.clone())
                .or_default()
                .extend(targets.iter().cloned());
        }
    }
}

impl Default for Workflow {
    /// An empty workflow: no states, no transitions, nothing reachable.
    /// Useful only as a merge target for a replicated definition.
    fn default() -> Self {
        Self::new("", HashMap::new())
    }
}
