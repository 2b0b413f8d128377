//! Transport abstraction between peers.
//!
//! The engine only needs one verb: deliver a delta, get an ack back.
//! Production deployments put a network client behind this trait; the
//! in-process [`ChannelTransport`] wires managers to each other
//! directly and is what the integration tests run on.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use meld_core::SyncError;

use crate::manager::Manager;
use crate::sync::wire::{AckMessage, DeltaMessage};

/// Delivers one delta to one peer and returns its acknowledgement.
pub trait PeerTransport: Send + Sync + 'static {
    fn send_delta(
        &self,
        peer: &str,
        delta: DeltaMessage,
    ) -> impl Future<Output = Result<AckMessage, SyncError>> + Send;
}

/// In-process transport: peers are managers in the same process,
/// addressed by name. A disconnected peer behaves like an unreachable
/// host, which is how tests exercise the retry path.
#[derive(Default)]
pub struct ChannelTransport {
    peers: DashMap<String, Arc<Manager>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `manager` reachable under `name`.
    pub fn connect(&self, name: impl Into<String>, manager: Arc<Manager>) {
        self.peers.insert(name.into(), manager);
    }

    /// Drop the route to `name`. Subsequent sends fail as unreachable
    /// until the peer is connected again.
    pub fn disconnect(&self, name: &str) -> bool {
        self.peers.remove(name).is_some()
    }
}

impl PeerTransport for ChannelTransport {
    async fn send_delta(
        &self,
        peer: &str,
        delta: DeltaMessage,
    ) -> Result<AckMessage, SyncError> {
        let manager = self
            .peers
            .get(peer)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SyncError::PeerUnreachable(peer.to_string()))?;
        manager
            .apply_delta(&delta)
            .map_err(|e| SyncError::MalformedDelta {
                reason: e.to_string(),
            })
    }
}
