//! Messages exchanged between peers during delta sync.

use meld_core::NodeId;
use meld_crdt::{CrdtKind, OpLogEntry, VectorClock};
use serde::{Deserialize, Serialize};

/// A batch of op-log entries one node believes a peer is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaMessage {
    /// Instance the entries belong to.
    pub instance: String,
    /// Kind of the instance, so an unknown instance can be registered
    /// on first contact.
    pub kind: CrdtKind,
    /// Node sending the delta.
    pub sender: NodeId,
    /// High-water marks the sender has incorporated. Informational:
    /// the receiver's duplicate gate is its own instance clock,
    /// advanced per applied entry. This clock cannot be folded in on
    /// receipt, since a capped batch covers less than the sender holds.
    pub sender_clock: VectorClock,
    /// Entries the receiver's last known clock had not covered, oldest
    /// first, capped at the configured batch size.
    pub entries: Vec<OpLogEntry>,
}

/// Acknowledgement for one delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    /// Instance the ack refers to.
    pub instance: String,
    /// Node sending the ack.
    pub sender: NodeId,
    /// The receiver's clock after applying the delta. The sender
    /// merges this into its record of the peer.
    pub applied_up_to: VectorClock,
}
