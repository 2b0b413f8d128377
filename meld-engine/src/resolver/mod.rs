//! Semantic conflict detection on merged state.
//!
//! The merge itself never fails and never loses CRDT-level data, but
//! some outcomes are still conflicts at the application level: two
//! nodes raced a workflow out of the same state, a register silently
//! dropped a concurrent write, a graph kept an edge whose endpoint a
//! peer removed. Detectors inspect the pre-merge and post-merge states
//! of one instance, record what happened, and apply deterministic
//! repairs where the type has one.
//!
//! Determinism is the contract: every node reaching the same merged
//! state must apply the same repair and land on the same final state,
//! otherwise resolution itself would diverge.

mod detectors;

pub use detectors::{GraphDanglingEdges, LwwDiscardedWrite, WorkflowDivergence};

use meld_core::ConflictRecord;
use meld_crdt::{CrdtKind, CrdtState};
use tracing::debug;

/// One conflict detector, bound to a single CRDT kind.
pub trait ConflictDetector: Send + Sync {
    /// The kind of instance this detector inspects.
    fn kind(&self) -> CrdtKind;

    /// Inspect one instance after a merge. `before` is the local state
    /// immediately prior; `after` is the merged state, mutable so that
    /// detectors with a deterministic repair can apply it in place.
    fn inspect(
        &self,
        name: &str,
        before: &CrdtState,
        after: &mut CrdtState,
    ) -> Vec<ConflictRecord>;
}

/// Runs every registered detector matching the instance kind.
pub struct Resolver {
    detectors: Vec<Box<dyn ConflictDetector>>,
}

impl Resolver {
    /// A resolver with no detectors. Merges still converge; nothing is
    /// recorded or repaired.
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// The standard set: workflow divergence, discarded register
    /// writes, dangling graph edges.
    pub fn with_default_detectors() -> Self {
        let mut resolver = Self::new();
        resolver.register(Box::new(WorkflowDivergence));
        resolver.register(Box::new(LwwDiscardedWrite));
        resolver.register(Box::new(GraphDanglingEdges));
        resolver
    }

    /// Add a detector. Detectors run in registration order.
    pub fn register(&mut self, detector: Box<dyn ConflictDetector>) {
        self.detectors.push(detector);
    }

    /// Run all detectors for the instance's kind and collect their
    /// records. Repairs mutate `after` in place.
    pub fn inspect(
        &self,
        name: &str,
        before: &CrdtState,
        after: &mut CrdtState,
    ) -> Vec<ConflictRecord> {
        let kind = after.kind();
        let mut records = Vec::new();
        for detector in self.detectors.iter().filter(|d| d.kind() == kind) {
            let found = detector.inspect(name, before, after);
            if !found.is_empty() {
                debug!(
                    instance = name,
                    kind = %kind,
                    conflicts = found.len(),
                    "conflicts detected on merged state"
                );
            }
            records.extend(found);
        }
        records
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::with_default_detectors()
    }
}
