//! Versioned snapshot framing for the archival boundary.
//!
//! Snapshots cross the persistence boundary as opaque bytes. The
//! envelope carries a format tag and a schema version so future
//! internal-representation changes can migrate old snapshots instead of
//! rejecting them.

use meld_core::{NodeId, RegistryError};
use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::state::{CrdtKind, CrdtState};

/// Format tag every Meld snapshot starts with.
pub const FORMAT: &str = "meld-snapshot";

/// Highest schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// The serialized form of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Always [`FORMAT`].
    pub format: String,
    /// Schema version of `state`'s encoding.
    pub schema_version: u32,
    pub kind: CrdtKind,
    pub state: CrdtState,
    /// High-water marks incorporated at snapshot time.
    pub version_vector: VectorClock,
    /// The local node's Lamport counter floor at snapshot time.
    pub lamport: u64,
    /// Node that took the snapshot.
    pub node: NodeId,
}

/// Encode an instance's state for the archival collaborator.
pub fn encode(
    state: &CrdtState,
    version_vector: &VectorClock,
    lamport: u64,
    node: &NodeId,
) -> Result<Vec<u8>, serde_json::Error> {
    let envelope = SnapshotEnvelope {
        format: FORMAT.to_string(),
        schema_version: SCHEMA_VERSION,
        kind: state.kind(),
        state: state.clone(),
        version_vector: version_vector.clone(),
        lamport,
        node: node.clone(),
    };
    serde_json::to_vec(&envelope)
}

/// Decode and validate a snapshot. Derived local state (sorted indexes)
/// is rebuilt before the envelope is returned.
pub fn decode(bytes: &[u8]) -> Result<SnapshotEnvelope, RegistryError> {
    let mut envelope: SnapshotEnvelope =
        serde_json::from_slice(bytes).map_err(|e| RegistryError::SnapshotFormat {
            reason: e.to_string(),
        })?;
    if envelope.format != FORMAT {
        return Err(RegistryError::SnapshotFormat {
            reason: format!("unknown format tag: {}", envelope.format),
        });
    }
    if envelope.schema_version > SCHEMA_VERSION {
        return Err(RegistryError::UnsupportedSchemaVersion {
            found: envelope.schema_version,
            supported: SCHEMA_VERSION,
        });
    }
    envelope.state.refresh();
    Ok(envelope)
}
