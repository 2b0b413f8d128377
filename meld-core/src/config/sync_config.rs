//! Configuration for the peer synchronization engine.
//!
//! # Examples
//!
//! ```
//! use meld_core::config::SyncConfig;
//!
//! let config = SyncConfig::default();
//! assert_eq!(config.sync_interval_secs, 5);
//! assert!(config.backoff_max_ms >= config.backoff_base_ms);
//! ```

use serde::{Deserialize, Serialize};

/// Tunables for the per-peer sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic sync cycles per peer. Default: 5.
    pub sync_interval_secs: u64,
    /// Milliseconds to wait in AwaitingAck before declaring a timeout.
    /// Applies to that state only. Default: 2000.
    pub ack_timeout_ms: u64,
    /// Initial backoff after a retryable failure, in ms. Default: 500.
    pub backoff_base_ms: u64,
    /// Backoff cap, in ms. Backoff doubles per consecutive failure up to
    /// this bound and resets on the next success. Default: 30_000.
    pub backoff_max_ms: u64,
    /// Maximum operation log entries per delta message. Remaining novelty
    /// is picked up by the next cycle. Default: 512.
    pub delta_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 5,
            ack_timeout_ms: 2000,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            delta_batch_size: 512,
        }
    }
}
