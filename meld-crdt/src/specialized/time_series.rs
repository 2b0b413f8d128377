//! Append-only time-ordered series CRDT.
//!
//! An OR-Set of samples keyed by a synthetic unique id, with a local
//! sorted index (not part of the replicated state) for O(log n) range
//! queries. Appends always succeed and commute with any concurrent
//! append. A bounded series evicts its oldest entries, and the eviction
//! is itself a tracked OR-Set removal so the bound stays merge-safe.

use chrono::{DateTime, Utc};
use meld_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::primitives::{AddTag, ORSet};

/// One replicated data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Synthetic unique id; the OR-Set element key.
    pub id: Uuid,
    /// The sample's own time axis (wall clock, caller-supplied).
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub metadata: Value,
}

/// Aggregation over a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Mean,
    Sum,
    Count,
    Min,
    Max,
}

/// A time series with conflict-free concurrent appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    samples: ORSet<Uuid>,
    payloads: HashMap<Uuid, Sample>,
    /// Optional bound; enforced on local appends via tracked removals.
    max_size: Option<usize>,
    /// Local sorted index over visible samples. Derived state: never
    /// replicated, rebuilt after every mutation and merge.
    #[serde(skip)]
    index: BTreeMap<(DateTime<Utc>, Uuid), Uuid>,
}

impl TimeSeries {
    /// Create an unbounded series.
    pub fn new() -> Self {
        Self::with_max_size(None)
    }

    /// Create a series that keeps at most `max_size` visible samples,
    /// evicting oldest-first on append.
    pub fn with_max_size(max_size: Option<usize>) -> Self {
        Self {
            samples: ORSet::new(),
            payloads: HashMap::new(),
            max_size,
            index: BTreeMap::new(),
        }
    }

    /// Append a data point. Always succeeds; returns the sample, its add
    /// tag, and any evictions performed to honor `max_size`, so the full
    /// effect can be logged and replayed deterministically.
    pub fn append(
        &mut self,
        timestamp: DateTime<Utc>,
        value: f64,
        metadata: Value,
        node: &NodeId,
    ) -> (Sample, AddTag, Vec<(Uuid, HashSet<AddTag>)>) {
        let sample = Sample {
            id: Uuid::new_v4(),
            timestamp,
            value,
            metadata,
        };
        let tag = AddTag::new(node);
        let evicted = self.plan_evictions(&sample, &tag);
        self.apply_append(sample.clone(), tag.clone(), &evicted);
        (sample, tag, evicted)
    }

    /// Replay an append minted at the origin, evictions included.
    pub fn apply_append(
        &mut self,
        sample: Sample,
        tag: AddTag,
        evicted: &[(Uuid, HashSet<AddTag>)],
    ) {
        self.samples.apply_add(sample.id, tag);
        self.payloads.insert(sample.id, sample);
        for (_, tags) in evicted {
            self.samples.apply_remove(tags);
        }
        self.rebuild_index();
    }

    /// Oldest samples, incoming included, that must go so the bound
    /// holds. An incoming sample older than everything retained evicts
    /// itself: the add and its tombstone travel in the same op, so the
    /// append still succeeds and replicas converge on the same bound.
    fn plan_evictions(
        &self,
        incoming: &Sample,
        incoming_tag: &AddTag,
    ) -> Vec<(Uuid, HashSet<AddTag>)> {
        let Some(max) = self.max_size else {
            return Vec::new();
        };
        let visible = self.index.len() + 1; // incoming included
        if visible <= max {
            return Vec::new();
        }
        let overflow = visible - max;
        let mut candidates: Vec<((DateTime<Utc>, Uuid), Uuid)> =
            self.index.iter().map(|(key, &id)| (*key, id)).collect();
        candidates.push(((incoming.timestamp, incoming.id), incoming.id));
        candidates.sort();
        candidates.truncate(overflow);
        candidates
            .into_iter()
            .map(|(_, id)| {
                if id == incoming.id {
                    (id, HashSet::from([incoming_tag.clone()]))
                } else {
                    (id, self.samples.visible_tags(&id))
                }
            })
            .collect()
    }

    /// Samples with `start <= timestamp <= end`, in time order.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Sample> {
        self.index
            .range((start, Uuid::nil())..=(end, Uuid::max()))
            .filter_map(|(_, id)| self.payloads.get(id))
            .collect()
    }

    /// Aggregate over a time range. `Count` always yields a value; the
    /// others return `None` on an empty range.
    pub fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        agg: Aggregate,
    ) -> Option<f64> {
        let values: Vec<f64> = self.range(start, end).iter().map(|s| s.value).collect();
        match agg {
            Aggregate::Count => Some(values.len() as f64),
            _ if values.is_empty() => None,
            Aggregate::Sum => Some(values.iter().sum()),
            Aggregate::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregate::Min => values.iter().copied().reduce(f64::min),
            Aggregate::Max => values.iter().copied().reduce(f64::max),
        }
    }

    /// Number of visible samples.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no sample is visible.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All visible samples in time order.
    pub fn samples(&self) -> Vec<&Sample> {
        self.index
            .values()
            .filter_map(|id| self.payloads.get(id))
            .collect()
    }

    /// Merge with another series. The local index is recomputed after
    /// every merge, never exchanged.
    pub fn merge(&mut self, other: &Self) {
        self.samples.merge(&other.samples);
        for (id, sample) in &other.payloads {
            self.payloads.entry(*id).or_insert_with(|| sample.clone());
        }
        self.rebuild_index();
    }

    /// Drop tombstones and the payloads of evicted samples. Causal gate
    /// is the caller's responsibility (engine compaction).
    pub fn prune_tombstones(&mut self) -> usize {
        let dropped = self.samples.prune_tombstones();
        self.payloads.retain(|id, _| self.samples.contains(id));
        self.rebuild_index();
        dropped
    }

    /// Rebuild the local sorted index from the replicated state. Called
    /// after deserialization, since the index is never encoded.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for id in self.samples.elements() {
            if let Some(sample) = self.payloads.get(id) {
                self.index.insert((sample.timestamp, *id), *id);
            }
        }
    }
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TimeSeries {
    /// Replicated state only; the derived index is excluded.
    fn eq(&self, other: &Self) -> bool {
        self.samples == other.samples
            && self.payloads == other.payloads
            && self.max_size == other.max_size
    }
}
