//! The built-in detectors.

use std::collections::HashSet;

use meld_core::{ConflictRecord, ResolutionStrategy};
use meld_crdt::{CrdtKind, CrdtState};
use tracing::debug;

use super::ConflictDetector;

/// Two nodes moved a workflow out of the same state concurrently. The
/// merge already picked a winner (last writer on the current-state
/// register); this detector records the losing transitions, which stay
/// in the history set.
pub struct WorkflowDivergence;

impl ConflictDetector for WorkflowDivergence {
    fn kind(&self) -> CrdtKind {
        CrdtKind::Workflow
    }

    fn inspect(
        &self,
        name: &str,
        before: &CrdtState,
        after: &mut CrdtState,
    ) -> Vec<ConflictRecord> {
        let (CrdtState::Workflow(pre), CrdtState::Workflow(merged)) = (before, &*after) else {
            return Vec::new();
        };
        if pre == merged {
            return Vec::new();
        }

        let current = merged.current_state();
        // The transition that landed on the merged current state with
        // the greatest (timestamp, node) pair is the winner.
        let Some(winner) = merged
            .history()
            .into_iter()
            .filter(|r| r.to == current)
            .max_by(|a, b| (a.timestamp, &a.node).cmp(&(b.timestamp, &b.node)))
            .cloned()
        else {
            return Vec::new();
        };

        let known: HashSet<_> = pre.history().into_iter().cloned().collect();
        let losers: Vec<_> = merged
            .concurrent_departures(&winner.from)
            .into_iter()
            .filter(|r| **r != winner)
            .cloned()
            .collect();
        // Report only when this merge brought in a racing transition we
        // had not seen; re-merging the same states stays quiet.
        if losers.is_empty() || (known.contains(&winner) && losers.iter().all(|r| known.contains(r)))
        {
            return Vec::new();
        }

        let mut conflicting = vec![format!(
            "{} -> {} by {} at {}",
            winner.from, winner.to, winner.node, winner.timestamp
        )];
        conflicting.extend(
            losers
                .iter()
                .map(|r| format!("{} -> {} by {} at {}", r.from, r.to, r.node, r.timestamp)),
        );
        let outcome = format!(
            "kept transition to '{}' by {}; {} concurrent departure(s) from '{}' retained in history",
            winner.to,
            winner.node,
            losers.len(),
            winner.from
        );
        debug!(instance = name, winner = %winner.to, "workflow divergence");
        vec![ConflictRecord::new(
            name,
            conflicting,
            ResolutionStrategy::LastWriterWins,
            outcome,
        )]
    }
}

/// A last-writer-wins register discarded the local value on merge with
/// an equal-timestamp write from another node. Equal stamps are the
/// unambiguous concurrency signal; the node-id tie-break decided the
/// winner, so the losing write is recorded for the application.
pub struct LwwDiscardedWrite;

impl ConflictDetector for LwwDiscardedWrite {
    fn kind(&self) -> CrdtKind {
        CrdtKind::LwwRegister
    }

    fn inspect(
        &self,
        name: &str,
        before: &CrdtState,
        after: &mut CrdtState,
    ) -> Vec<ConflictRecord> {
        let (CrdtState::LwwRegister(pre), CrdtState::LwwRegister(merged)) = (before, &*after)
        else {
            return Vec::new();
        };
        if pre == merged || pre.timestamp() != merged.timestamp() {
            return Vec::new();
        }

        // Same timestamp, different node: the local write lost the
        // deterministic tie-break and the register holds no trace of it.
        let conflicting = vec![
            format!(
                "kept: {} by {} at {}",
                merged.get(),
                merged.node(),
                merged.timestamp()
            ),
            format!(
                "discarded: {} by {} at {}",
                pre.get(),
                pre.node(),
                pre.timestamp()
            ),
        ];
        let outcome = format!(
            "equal timestamps; kept write from {} over {} by node-id tie-break",
            merged.node(),
            pre.node()
        );
        vec![ConflictRecord::new(
            name,
            conflicting,
            ResolutionStrategy::RecordedOnly,
            outcome,
        )]
    }
}

/// An add-edge raced a remove-vertex on another node: the merged graph
/// holds an edge with a missing endpoint. The repair removes the edge.
/// Every node reaching this merged state sees the same dangling edges
/// and tombstones the same tags, so the repair converges.
pub struct GraphDanglingEdges;

impl ConflictDetector for GraphDanglingEdges {
    fn kind(&self) -> CrdtKind {
        CrdtKind::Graph
    }

    fn inspect(
        &self,
        name: &str,
        _before: &CrdtState,
        after: &mut CrdtState,
    ) -> Vec<ConflictRecord> {
        let CrdtState::Graph(graph) = after else {
            return Vec::new();
        };
        let dangling = graph.dangling_edges();
        if dangling.is_empty() {
            return Vec::new();
        }

        let mut records = Vec::new();
        for edge in dangling {
            graph.remove_edge(&edge.source, &edge.target);
            debug!(
                instance = name,
                source = %edge.source,
                target = %edge.target,
                "removed dangling edge"
            );
            records.push(ConflictRecord::new(
                name,
                vec![format!("edge {} -> {}", edge.source, edge.target)],
                ResolutionStrategy::DeterministicRepair,
                format!(
                    "removed edge {} -> {}: an endpoint was removed concurrently",
                    edge.source, edge.target
                ),
            ));
        }
        records
    }
}
