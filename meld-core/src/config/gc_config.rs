//! Configuration for operation-log and tombstone garbage collection.
//!
//! Compaction is causally gated: an entry or tombstone may only be dropped
//! once every known peer's version vector has advanced past it. These knobs
//! bound how eagerly that gate is exercised, never whether it is honored.

use serde::{Deserialize, Serialize};

/// Tunables for causally-safe log compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Skip compaction while the log holds fewer entries than this.
    /// Default: 64.
    pub compact_min_entries: usize,
    /// Seconds between background compaction passes. Default: 300.
    pub compact_interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            compact_min_entries: 64,
            compact_interval_secs: 300,
        }
    }
}
