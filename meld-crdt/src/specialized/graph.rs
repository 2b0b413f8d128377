//! Directed graph CRDT.
//!
//! An OR-Set of vertex ids plus an OR-Set of directed edges, each with
//! optional attached data in a nested LWW-Register. Removing a vertex
//! cascades to its incident edges as a batch of edge removals, minted at
//! the origin so the cascade replays identically everywhere.
//!
//! `neighbors` and `find_path` are pure local queries. Path search is
//! breadth-first with lexicographic expansion order, so a given replica
//! state always yields the same path.

use chrono::{DateTime, Utc};
use meld_core::{CrdtError, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::primitives::{AddTag, LWWRegister, ORSet};

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// One cascaded edge removal, observed at the origin of a vertex removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRemoval {
    pub source: String,
    pub target: String,
    pub tags: HashSet<AddTag>,
}

/// A vertex/edge graph with observed-remove semantics on both sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphCrdt {
    vertices: ORSet<String>,
    edges: ORSet<Edge>,
    vertex_data: HashMap<String, LWWRegister<Value>>,
    #[serde(with = "crate::serde_pairs")]
    edge_data: HashMap<Edge, LWWRegister<Value>>,
}

impl GraphCrdt {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            vertices: ORSet::new(),
            edges: ORSet::new(),
            vertex_data: HashMap::new(),
            edge_data: HashMap::new(),
        }
    }

    /// Add a vertex with optional attached data. Returns the add tag.
    pub fn add_vertex(
        &mut self,
        id: impl Into<String>,
        data: Option<Value>,
        node: &NodeId,
        now: DateTime<Utc>,
    ) -> AddTag {
        let id = id.into();
        let tag = AddTag::new(node);
        self.apply_add_vertex(&id, data, tag.clone(), now, node);
        tag
    }

    /// Replay a vertex add minted at the origin.
    pub fn apply_add_vertex(
        &mut self,
        id: &str,
        data: Option<Value>,
        tag: AddTag,
        timestamp: DateTime<Utc>,
        origin: &NodeId,
    ) {
        self.vertices.apply_add(id.to_string(), tag);
        if let Some(value) = data {
            self.vertex_data
                .entry(id.to_string())
                .or_default()
                .set(value, timestamp, origin.clone());
        }
    }

    /// Remove a vertex and cascade to its incident edges. Returns the
    /// tombstoned vertex tags and the cascaded edge removals.
    pub fn remove_vertex(&mut self, id: &str) -> (HashSet<AddTag>, Vec<EdgeRemoval>) {
        let incident: Vec<Edge> = self
            .edges
            .elements()
            .into_iter()
            .filter(|e| e.source == id || e.target == id)
            .cloned()
            .collect();

        let mut cascades = Vec::with_capacity(incident.len());
        for edge in incident {
            let tags = self.edges.remove(&edge);
            cascades.push(EdgeRemoval {
                source: edge.source,
                target: edge.target,
                tags,
            });
        }
        let tags = self.vertices.remove(&id.to_string());
        (tags, cascades)
    }

    /// Replay a vertex removal, cascades included.
    pub fn apply_remove_vertex(&mut self, tags: &HashSet<AddTag>, edges: &[EdgeRemoval]) {
        self.vertices.apply_remove(tags);
        for removal in edges {
            self.edges.apply_remove(&removal.tags);
        }
    }

    /// Add a directed edge. Both endpoints must be visible locally.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        data: Option<Value>,
        node: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<AddTag, CrdtError> {
        if !self.has_vertex(source) {
            return Err(CrdtError::UnknownVertex(source.to_string()));
        }
        if !self.has_vertex(target) {
            return Err(CrdtError::UnknownVertex(target.to_string()));
        }
        let tag = AddTag::new(node);
        self.apply_add_edge(source, target, data, tag.clone(), now, node);
        Ok(tag)
    }

    /// Replay an edge add. No endpoint check: the edge was valid at its
    /// origin, and a concurrent vertex removal is a semantic conflict
    /// for the resolver, not a reason to reject the merge.
    pub fn apply_add_edge(
        &mut self,
        source: &str,
        target: &str,
        data: Option<Value>,
        tag: AddTag,
        timestamp: DateTime<Utc>,
        origin: &NodeId,
    ) {
        let edge = Edge::new(source, target);
        self.edges.apply_add(edge.clone(), tag);
        if let Some(value) = data {
            self.edge_data
                .entry(edge)
                .or_default()
                .set(value, timestamp, origin.clone());
        }
    }

    /// Remove an edge. Returns the tombstoned tags.
    pub fn remove_edge(&mut self, source: &str, target: &str) -> HashSet<AddTag> {
        self.edges.remove(&Edge::new(source, target))
    }

    /// Replay an edge removal.
    pub fn apply_remove_edge(&mut self, tags: &HashSet<AddTag>) {
        self.edges.apply_remove(tags);
    }

    /// Pure query: is the vertex visible?
    pub fn has_vertex(&self, id: &str) -> bool {
        self.vertices.contains(&id.to_string())
    }

    /// Pure query: is the edge visible?
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges.contains(&Edge::new(source, target))
    }

    /// All visible vertex ids, sorted.
    pub fn vertices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.vertices.elements().into_iter().cloned().collect();
        ids.sort();
        ids
    }

    /// All visible edges, sorted by (source, target).
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.edges.elements().into_iter().cloned().collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        edges
    }

    /// Attached data for a visible vertex.
    pub fn vertex_data(&self, id: &str) -> Option<&Value> {
        if !self.has_vertex(id) {
            return None;
        }
        self.vertex_data.get(id).map(|reg| reg.get())
    }

    /// Attached data for a visible edge.
    pub fn edge_data(&self, source: &str, target: &str) -> Option<&Value> {
        if !self.has_edge(source, target) {
            return None;
        }
        self.edge_data
            .get(&Edge::new(source, target))
            .map(|reg| reg.get())
    }

    /// Outgoing neighbors of a vertex, sorted. Only visible edges whose
    /// target vertex is also visible count.
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .edges
            .elements()
            .into_iter()
            .filter(|e| e.source == id && self.has_vertex(&e.target))
            .map(|e| e.target.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Breadth-first path from `source` to `target`, at most `max_depth`
    /// edges. Expansion order is lexicographic by vertex id, so the
    /// result is deterministic for a given replica state.
    pub fn find_path(&self, source: &str, target: &str, max_depth: usize) -> Option<Vec<String>> {
        if !self.has_vertex(source) || !self.has_vertex(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.to_string()]);
        }

        let mut predecessor: HashMap<String, String> = HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((source.to_string(), 0));

        while let Some((vertex, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for next in self.neighbors(&vertex) {
                if next == source || predecessor.contains_key(&next) {
                    continue;
                }
                predecessor.insert(next.clone(), vertex.clone());
                if next == target {
                    let mut path = vec![next];
                    while let Some(prev) = predecessor.get(path.last().unwrap()) {
                        path.push(prev.clone());
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((next, depth + 1));
            }
        }
        None
    }

    /// Edges whose source or target vertex is no longer visible. Arises
    /// from a concurrent add-edge / remove-vertex race; the resolver
    /// repairs it deterministically.
    pub fn dangling_edges(&self) -> Vec<Edge> {
        let mut dangling: Vec<Edge> = self
            .edges
            .elements()
            .into_iter()
            .filter(|e| !self.has_vertex(&e.source) || !self.has_vertex(&e.target))
            .cloned()
            .collect();
        dangling.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        dangling
    }

    /// Merge with another graph: OR-Set merges on both element sets,
    /// pointwise LWW merges on attached data.
    pub fn merge(&mut self, other: &Self) {
        self.vertices.merge(&other.vertices);
        self.edges.merge(&other.edges);
        for (id, reg) in &other.vertex_data {
            self.vertex_data
                .entry(id.clone())
                .and_modify(|local| local.merge(reg))
                .or_insert_with(|| reg.clone());
        }
        for (edge, reg) in &other.edge_data {
            self.edge_data
                .entry(edge.clone())
                .and_modify(|local| local.merge(reg))
                .or_insert_with(|| reg.clone());
        }
    }

    /// Drop tombstones on both sets. Causal gate is the caller's
    /// responsibility.
    pub fn prune_tombstones(&mut self) -> usize {
        self.vertices.prune_tombstones() + self.edges.prune_tombstones()
    }
}

impl Default for GraphCrdt {
    fn default() -> Self {
        Self::new()
    }
}
