//! The closed tagged union over every CRDT kind.
//!
//! One variant per type, dispatched through a single
//! `prepare`/`apply`/`merge`/`value` surface instead of runtime type
//! inspection. `prepare` validates an intent against local state and
//! mints a replayable effect; `apply` replays an effect
//! deterministically; `merge` between two states of the same kind never
//! fails.

use chrono::Utc;
use meld_core::{CrdtError, NodeId, RegistryError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::op::{CrdtOp, Mutation};
use crate::primitives::{GCounter, GSet, LWWRegister, ORSet, PNCounter};
use crate::specialized::{GraphCrdt, TimeSeries, Workflow};

/// Tag for each CRDT kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrdtKind {
    GCounter,
    PnCounter,
    GSet,
    OrSet,
    LwwRegister,
    TimeSeries,
    Graph,
    Workflow,
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrdtKind::GCounter => "g_counter",
            CrdtKind::PnCounter => "pn_counter",
            CrdtKind::GSet => "g_set",
            CrdtKind::OrSet => "or_set",
            CrdtKind::LwwRegister => "lww_register",
            CrdtKind::TimeSeries => "time_series",
            CrdtKind::Graph => "graph",
            CrdtKind::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

/// Live state of one CRDT instance, one variant per kind.
///
/// Set elements at this level are strings; library users needing richer
/// element types use the generic primitives directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum CrdtState {
    GCounter(GCounter),
    PnCounter(PNCounter),
    GSet(GSet<String>),
    OrSet(ORSet<String>),
    LwwRegister(LWWRegister<Value>),
    TimeSeries(TimeSeries),
    Graph(GraphCrdt),
    Workflow(Workflow),
}

impl CrdtState {
    /// Empty state for a kind. A workflow created this way has an empty
    /// transition table; register workflows with an explicit initial
    /// state instead.
    pub fn new(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::GCounter => CrdtState::GCounter(GCounter::new()),
            CrdtKind::PnCounter => CrdtState::PnCounter(PNCounter::new()),
            CrdtKind::GSet => CrdtState::GSet(GSet::new()),
            CrdtKind::OrSet => CrdtState::OrSet(ORSet::new()),
            CrdtKind::LwwRegister => CrdtState::LwwRegister(LWWRegister::default()),
            CrdtKind::TimeSeries => CrdtState::TimeSeries(TimeSeries::new()),
            CrdtKind::Graph => CrdtState::Graph(GraphCrdt::new()),
            CrdtKind::Workflow => CrdtState::Workflow(Workflow::default()),
        }
    }

    /// The kind tag for this state.
    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtState::GCounter(_) => CrdtKind::GCounter,
            CrdtState::PnCounter(_) => CrdtKind::PnCounter,
            CrdtState::GSet(_) => CrdtKind::GSet,
            CrdtState::OrSet(_) => CrdtKind::OrSet,
            CrdtState::LwwRegister(_) => CrdtKind::LwwRegister,
            CrdtState::TimeSeries(_) => CrdtKind::TimeSeries,
            CrdtState::Graph(_) => CrdtKind::Graph,
            CrdtState::Workflow(_) => CrdtKind::Workflow,
        }
    }

    /// Validate an intent against local state and mint the replayable
    /// effect, without mutating. All validation rejections happen here.
    pub fn prepare(&self, mutation: &Mutation, origin: &NodeId) -> Result<CrdtOp, CrdtError> {
        let now = Utc::now();
        match (self, mutation) {
            (CrdtState::GCounter(_) | CrdtState::PnCounter(_), Mutation::Increment { amount }) => {
                Ok(CrdtOp::Increment { amount: *amount })
            }
            (CrdtState::PnCounter(_), Mutation::Decrement { amount }) => {
                Ok(CrdtOp::Decrement { amount: *amount })
            }
            (CrdtState::GSet(_) | CrdtState::OrSet(_), Mutation::Add { element }) => {
                Ok(CrdtOp::Add {
                    element: element.clone(),
                    tag: crate::primitives::AddTag::new(origin),
                })
            }
            (CrdtState::OrSet(set), Mutation::Remove { element }) => Ok(CrdtOp::Remove {
                element: element.clone(),
                tags: set.visible_tags(element),
            }),
            (CrdtState::LwwRegister(_), Mutation::Write { value }) => Ok(CrdtOp::Write {
                value: value.clone(),
                timestamp: now,
            }),
            (CrdtState::TimeSeries(_), Mutation::Append { .. }) => {
                // Appends always succeed; the effect (tag, evictions) is
                // minted during application, so prepare defers to apply
                // via the manager's append path.
                Err(CrdtError::InvalidOperation {
                    kind: self.kind().to_string(),
                    reason: "append is prepared through CrdtState::append".to_string(),
                })
            }
            (CrdtState::Graph(_), Mutation::AddVertex { id, data }) => Ok(CrdtOp::AddVertex {
                id: id.clone(),
                data: data.clone(),
                tag: crate::primitives::AddTag::new(origin),
                timestamp: now,
            }),
            (CrdtState::Graph(graph), Mutation::RemoveVertex { id }) => {
                // Observe the cascade without mutating: plan on a copy.
                let mut scratch = graph.clone();
                let (tags, edges) = scratch.remove_vertex(id);
                Ok(CrdtOp::RemoveVertex {
                    id: id.clone(),
                    tags,
                    edges,
                })
            }
            (CrdtState::Graph(graph), Mutation::AddEdge {
                source,
                target,
                data,
            }) => {
                if !graph.has_vertex(source) {
                    return Err(CrdtError::UnknownVertex(source.clone()));
                }
                if !graph.has_vertex(target) {
                    return Err(CrdtError::UnknownVertex(target.clone()));
                }
                Ok(CrdtOp::AddEdge {
                    source: source.clone(),
                    target: target.clone(),
                    data: data.clone(),
                    tag: crate::primitives::AddTag::new(origin),
                    timestamp: now,
                })
            }
            (CrdtState::Graph(graph), Mutation::RemoveEdge { source, target }) => {
                let mut scratch = graph.clone();
                let tags = scratch.remove_edge(source, target);
                Ok(CrdtOp::RemoveEdge {
                    source: source.clone(),
                    target: target.clone(),
                    tags,
                })
            }
            (CrdtState::Workflow(wf), Mutation::TransitionTo { state, data }) => {
                if !wf.can_transition(state) {
                    return Err(CrdtError::InvalidTransition {
                        from: wf.current_state().to_string(),
                        to: state.clone(),
                    });
                }
                Ok(CrdtOp::TransitionTo {
                    state: state.clone(),
                    data: data.clone(),
                    from: wf.current_state().to_string(),
                    timestamp: now,
                })
            }
            _ => Err(CrdtError::InvalidOperation {
                kind: self.kind().to_string(),
                reason: format!("mutation not supported by {}", self.kind()),
            }),
        }
    }

    /// Time-series append: the one mutator whose effect is minted during
    /// application (tag and evictions depend on post-insert state).
    pub fn append(
        &mut self,
        timestamp: chrono::DateTime<Utc>,
        value: f64,
        metadata: Value,
        origin: &NodeId,
    ) -> Result<CrdtOp, CrdtError> {
        match self {
            CrdtState::TimeSeries(series) => {
                let (sample, tag, evicted) = series.append(timestamp, value, metadata, origin);
                Ok(CrdtOp::Append {
                    sample,
                    tag,
                    evicted,
                })
            }
            _ => Err(CrdtError::InvalidOperation {
                kind: self.kind().to_string(),
                reason: "append only applies to time series".to_string(),
            }),
        }
    }

    /// Replay an effect minted at `origin`. Deterministic: the same op
    /// applied to the same state yields the same state on every node.
    pub fn apply(&mut self, op: &CrdtOp, origin: &NodeId) -> Result<(), CrdtError> {
        match (self, op) {
            (CrdtState::GCounter(c), CrdtOp::Increment { amount }) => {
                c.increment(origin, *amount);
                Ok(())
            }
            (CrdtState::PnCounter(c), CrdtOp::Increment { amount }) => {
                c.increment(origin, *amount);
                Ok(())
            }
            (CrdtState::PnCounter(c), CrdtOp::Decrement { amount }) => {
                c.decrement(origin, *amount);
                Ok(())
            }
            (CrdtState::GSet(set), CrdtOp::Add { element, .. }) => {
                set.add(element.clone());
                Ok(())
            }
            (CrdtState::OrSet(set), CrdtOp::Add { element, tag }) => {
                set.apply_add(element.clone(), tag.clone());
                Ok(())
            }
            (CrdtState::OrSet(set), CrdtOp::Remove { tags, .. }) => {
                set.apply_remove(tags);
                Ok(())
            }
            (CrdtState::LwwRegister(reg), CrdtOp::Write { value, timestamp }) => {
                reg.set(value.clone(), *timestamp, origin.clone());
                Ok(())
            }
            (CrdtState::TimeSeries(series), CrdtOp::Append {
                sample,
                tag,
                evicted,
            }) => {
                series.apply_append(sample.clone(), tag.clone(), evicted);
                Ok(())
            }
            (CrdtState::Graph(graph), CrdtOp::AddVertex {
                id,
                data,
                tag,
                timestamp,
            }) => {
                graph.apply_add_vertex(id, data.clone(), tag.clone(), *timestamp, origin);
                Ok(())
            }
            (CrdtState::Graph(graph), CrdtOp::RemoveVertex { tags, edges, .. }) => {
                graph.apply_remove_vertex(tags, edges);
                Ok(())
            }
            (CrdtState::Graph(graph), CrdtOp::AddEdge {
                source,
                target,
                data,
                tag,
                timestamp,
            }) => {
                graph.apply_add_edge(source, target, data.clone(), tag.clone(), *timestamp, origin);
                Ok(())
            }
            (CrdtState::Graph(graph), CrdtOp::RemoveEdge { tags, .. }) => {
                graph.apply_remove_edge(tags);
                Ok(())
            }
            (CrdtState::Workflow(wf), CrdtOp::TransitionTo {
                state,
                data,
                from,
                timestamp,
            }) => {
                wf.apply_transition(&crate::specialized::TransitionRecord {
                    from: from.clone(),
                    to: state.clone(),
                    data: data.clone(),
                    timestamp: *timestamp,
                    node: origin.clone(),
                });
                Ok(())
            }
            (state, op) => Err(CrdtError::InvalidOperation {
                kind: state.kind().to_string(),
                reason: format!("op {} not valid for {}", op.kind_label(), state.kind()),
            }),
        }
    }

    /// Merge with another state of the same kind. Never fails for a
    /// matching kind; reports whether the local state changed.
    pub fn merge(&mut self, other: &CrdtState) -> Result<bool, RegistryError> {
        if self.kind() != other.kind() {
            return Err(RegistryError::KindMismatch {
                name: String::new(),
                expected: self.kind().to_string(),
                found: other.kind().to_string(),
            });
        }
        let before = self.clone();
        match (&mut *self, other) {
            (CrdtState::GCounter(a), CrdtState::GCounter(b)) => a.merge(b),
            (CrdtState::PnCounter(a), CrdtState::PnCounter(b)) => a.merge(b),
            (CrdtState::GSet(a), CrdtState::GSet(b)) => a.merge(b),
            (CrdtState::OrSet(a), CrdtState::OrSet(b)) => a.merge(b),
            (CrdtState::LwwRegister(a), CrdtState::LwwRegister(b)) => a.merge(b),
            (CrdtState::TimeSeries(a), CrdtState::TimeSeries(b)) => a.merge(b),
            (CrdtState::Graph(a), CrdtState::Graph(b)) => a.merge(b),
            (CrdtState::Workflow(a), CrdtState::Workflow(b)) => a.merge(b),
            _ => unreachable!("kind equality checked above"),
        }
        Ok(*self != before)
    }

    /// Deterministic value for the Manager API. Collections are sorted
    /// so converged replicas report byte-identical values.
    pub fn value(&self) -> Value {
        match self {
            CrdtState::GCounter(c) => json!(c.value()),
            CrdtState::PnCounter(c) => json!(c.value()),
            CrdtState::GSet(set) => {
                let mut elements: Vec<&String> = set.iter().collect();
                elements.sort();
                json!(elements)
            }
            CrdtState::OrSet(set) => {
                let mut elements: Vec<&String> = set.elements();
                elements.sort();
                json!(elements)
            }
            CrdtState::LwwRegister(reg) => reg.get().clone(),
            CrdtState::TimeSeries(series) => {
                let samples: Vec<Value> = series
                    .samples()
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "timestamp": s.timestamp,
                            "value": s.value,
                            "metadata": s.metadata,
                        })
                    })
                    .collect();
                json!(samples)
            }
            CrdtState::Graph(graph) => {
                let edges: Vec<Value> = graph
                    .edges()
                    .iter()
                    .map(|e| json!({ "source": e.source, "target": e.target }))
                    .collect();
                json!({ "vertices": graph.vertices(), "edges": edges })
            }
            CrdtState::Workflow(wf) => {
                let history: Vec<Value> = wf
                    .history()
                    .iter()
                    .map(|r| {
                        json!({
                            "from": r.from,
                            "to": r.to,
                            "data": r.data,
                            "timestamp": r.timestamp,
                            "node": r.node,
                        })
                    })
                    .collect();
                json!({ "current": wf.current_state(), "history": history })
            }
        }
    }

    /// Rebuild derived local state (sorted indexes). Required after
    /// deserialization; a no-op for kinds without derived state.
    pub fn refresh(&mut self) {
        if let CrdtState::TimeSeries(series) = self {
            series.rebuild_index();
        }
    }

    /// Drop tombstones. The caller owns the causal gate.
    pub fn prune_tombstones(&mut self) -> usize {
        match self {
            CrdtState::OrSet(set) => set.prune_tombstones(),
            CrdtState::TimeSeries(series) => series.prune_tombstones(),
            CrdtState::Graph(graph) => graph.prune_tombstones(),
            _ => 0,
        }
    }
}
