//! The per-peer sync session driver.
//!
//! For every `(instance, peer)` pair the engine tracks the peer's last
//! acknowledged version vector, the session phase, and a backoff
//! schedule. One sync cycle computes the entries the peer's clock does
//! not cover, ships them, and advances the tracked clock from the ack.
//! Failures never propagate past a cycle; the pair goes into backoff
//! and resumes from the same clock later.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meld_core::{GcConfig, MeldResult, SyncConfig, SyncError};
use meld_crdt::VectorClock;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, warn};

use crate::manager::Manager;
use crate::sync::backoff::Backoff;
use crate::sync::transport::PeerTransport;

/// Where a sync session currently is. `Error` holds until the backoff
/// delay elapses, then the pair re-enters `Idle` and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    ComputingDelta,
    Sending,
    AwaitingAck,
    Error,
}

struct PeerState {
    /// The peer's version vector as of its last ack. Deltas are
    /// computed against this; it only moves forward.
    clock: VectorClock,
    phase: SyncPhase,
    backoff: Backoff,
    /// Set after a failure: no attempt before this instant.
    next_attempt: Option<Instant>,
    last_error: Option<String>,
}

/// Drives delta sync for one manager against its peers.
pub struct SyncEngine<T: PeerTransport> {
    manager: Arc<Manager>,
    transport: Arc<T>,
    config: SyncConfig,
    gc: GcConfig,
    peers: DashMap<(String, String), PeerState>,
}

impl<T: PeerTransport> SyncEngine<T> {
    pub fn new(manager: Arc<Manager>, transport: Arc<T>, config: SyncConfig, gc: GcConfig) -> Self {
        Self {
            manager,
            transport,
            config,
            gc,
            peers: DashMap::new(),
        }
    }

    /// Start tracking `peer` for `instance`, from an empty clock: the
    /// first cycle offers the full log.
    pub fn add_peer(&self, instance: &str, peer: &str) {
        self.peers.insert(
            (instance.to_string(), peer.to_string()),
            PeerState {
                clock: VectorClock::new(),
                phase: SyncPhase::Idle,
                backoff: Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms),
                next_attempt: None,
                last_error: None,
            },
        );
    }

    pub fn remove_peer(&self, instance: &str, peer: &str) -> bool {
        self.peers
            .remove(&(instance.to_string(), peer.to_string()))
            .is_some()
    }

    /// Current session phase, if the pair is tracked.
    pub fn peer_phase(&self, instance: &str, peer: &str) -> Option<SyncPhase> {
        self.peers
            .get(&(instance.to_string(), peer.to_string()))
            .map(|s| s.phase)
    }

    /// Consecutive failures since the last successful cycle.
    pub fn peer_failures(&self, instance: &str, peer: &str) -> Option<u32> {
        self.peers
            .get(&(instance.to_string(), peer.to_string()))
            .map(|s| s.backoff.failures())
    }

    /// The last error recorded for the pair, cleared on success.
    pub fn peer_last_error(&self, instance: &str, peer: &str) -> Option<String> {
        self.peers
            .get(&(instance.to_string(), peer.to_string()))
            .and_then(|s| s.last_error.clone())
    }

    /// The peer's acknowledged clock for the instance.
    pub fn peer_clock(&self, instance: &str, peer: &str) -> Option<VectorClock> {
        self.peers
            .get(&(instance.to_string(), peer.to_string()))
            .map(|s| s.clock.clone())
    }

    /// Run one sync cycle for a pair. Returns the number of entries
    /// the peer acknowledged; zero means it was already up to date.
    pub async fn sync_instance(&self, instance: &str, peer: &str) -> MeldResult<usize> {
        let key = (instance.to_string(), peer.to_string());
        let peer_clock = {
            let mut state = self.peers.get_mut(&key).ok_or_else(|| {
                SyncError::PeerUnreachable(format!("{peer} is not tracked for {instance}"))
            })?;
            state.phase = SyncPhase::ComputingDelta;
            state.clock.clone()
        };

        let delta = match self
            .manager
            .delta_for(instance, &peer_clock, self.config.delta_batch_size)
        {
            Ok(delta) => delta,
            Err(e) => {
                self.fail(&key, &e.to_string());
                return Err(e);
            }
        };
        if delta.entries.is_empty() {
            self.set_phase(&key, SyncPhase::Idle);
            return Ok(0);
        }
        let count = delta.entries.len();

        self.set_phase(&key, SyncPhase::Sending);
        let send = self.transport.send_delta(peer, delta);
        self.set_phase(&key, SyncPhase::AwaitingAck);
        let ack = match timeout(Duration::from_millis(self.config.ack_timeout_ms), send).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                let delay = self.fail(&key, &e.to_string());
                warn!(instance, peer, error = %e, backoff_ms = delay.as_millis() as u64, "sync failed");
                return Err(e.into());
            }
            Err(_) => {
                let e = SyncError::AckTimeout {
                    peer: peer.to_string(),
                    elapsed_ms: self.config.ack_timeout_ms,
                };
                let delay = self.fail(&key, &e.to_string());
                warn!(instance, peer, backoff_ms = delay.as_millis() as u64, "ack timed out");
                return Err(e.into());
            }
        };

        if let Some(mut state) = self.peers.get_mut(&key) {
            state.clock.merge(&ack.applied_up_to);
            state.backoff.reset();
            state.next_attempt = None;
            state.last_error = None;
            state.phase = SyncPhase::Idle;
        }
        debug!(instance, peer, entries = count, "delta acknowledged");
        Ok(count)
    }

    /// Background loop: every interval, one cycle per tracked pair
    /// that is not in backoff, plus periodic log compaction. Stops when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.sync_interval_secs));
        let mut last_compact = Instant::now();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = Instant::now();
            let due: Vec<(String, String)> = self
                .peers
                .iter()
                .filter(|e| e.value().next_attempt.map_or(true, |t| now >= t))
                .map(|e| e.key().clone())
                .collect();
            for (instance, peer) in due {
                if let Some(mut state) = self.peers.get_mut(&(instance.clone(), peer.clone())) {
                    if state.phase == SyncPhase::Error {
                        state.phase = SyncPhase::Idle;
                    }
                }
                if let Err(e) = self.sync_instance(&instance, &peer).await {
                    warn!(instance = %instance, peer = %peer, error = %e, "sync cycle failed");
                }
            }

            if last_compact.elapsed() >= Duration::from_secs(self.gc.compact_interval_secs) {
                last_compact = Instant::now();
                for instance in self.manager.instance_names() {
                    match self.compact_instance(&instance) {
                        Ok(dropped) if dropped > 0 => {
                            debug!(instance = %instance, dropped, "compacted");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(instance = %instance, error = %e, "compaction failed"),
                    }
                }
            }
        }
        debug!("sync engine stopped");
    }

    /// Compact an instance's op log below the pointwise minimum of
    /// every tracked peer's acknowledged clock. Skipped while the log
    /// is under the configured threshold or no peer is tracked.
    pub fn compact_instance(&self, instance: &str) -> MeldResult<usize> {
        if self.manager.log_len(instance)? < self.gc.compact_min_entries {
            return Ok(0);
        }
        let clocks: Vec<VectorClock> = self
            .peers
            .iter()
            .filter(|e| e.key().0 == instance)
            .map(|e| e.value().clock.clone())
            .collect();
        if clocks.is_empty() {
            return Ok(0);
        }
        let floor = VectorClock::floor(clocks.iter());
        self.manager.compact(instance, &floor)
    }

    fn set_phase(&self, key: &(String, String), phase: SyncPhase) {
        if let Some(mut state) = self.peers.get_mut(key) {
            state.phase = phase;
        }
    }

    /// Record a failure: enter `Error`, extend the backoff, schedule
    /// the next attempt. Returns the delay.
    fn fail(&self, key: &(String, String), reason: &str) -> Duration {
        match self.peers.get_mut(key) {
            Some(mut state) => {
                state.phase = SyncPhase::Error;
                let delay = state.backoff.next_delay();
                state.next_attempt = Some(Instant::now() + delay);
                state.last_error = Some(reason.to_string());
                delay
            }
            None => Duration::ZERO,
        }
    }
}
