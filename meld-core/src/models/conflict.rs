//! Conflict audit records and merge reports.
//!
//! A [`ConflictRecord`] is produced when a merge yields state that is
//! CRDT-valid but application-invalid (a semantic conflict). Records form
//! an append-only audit trail: never deleted, only appended. The discarded
//! alternative is always described in `outcome` and remains inspectable in
//! the instance's own history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a detected semantic conflict was resolved.
///
/// Resolution must be deterministic across all nodes: resolving the same
/// merged state twice yields the same outcome everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Higher `(timestamp, node_id)` pair wins; loser retained in history.
    LastWriterWins,
    /// A type-specific deterministic repair was applied locally
    /// (same input state on every node, so the repair converges).
    DeterministicRepair,
    /// Flagged for the application; no automatic change was made.
    RecordedOnly,
}

/// Append-only audit row for one detected semantic conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique record id.
    pub id: Uuid,
    /// The instance the conflict was detected on.
    pub crdt_name: String,
    /// Human-readable descriptions of the operations or states in conflict.
    pub conflicting: Vec<String>,
    /// When the conflict was detected (local wall clock, audit only).
    pub detected_at: DateTime<Utc>,
    /// The resolution policy that was applied.
    pub strategy: ResolutionStrategy,
    /// What was kept, what was discarded, and where the loser survives.
    pub outcome: String,
}

impl ConflictRecord {
    pub fn new(
        crdt_name: impl Into<String>,
        conflicting: Vec<String>,
        strategy: ResolutionStrategy,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            crdt_name: crdt_name.into(),
            conflicting,
            detected_at: Utc::now(),
            strategy,
            outcome: outcome.into(),
        }
    }
}

/// Result of `merge_remote`: merge never fails, it reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    /// Whether the local state changed at all.
    pub changed: bool,
    /// Semantic conflicts detected on the post-merge state.
    pub conflicts: Vec<ConflictRecord>,
}

impl MergeReport {
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            conflicts: Vec::new(),
        }
    }
}
