/// Transport and sync-session failures.
///
/// Everything except a malformed delta is retryable: the sync engine logs
/// the failure, backs off, and resumes from the last acknowledged version
/// vector. None of these may surface as fatal to the application layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("ack timeout from {peer} after {elapsed_ms}ms")]
    AckTimeout { peer: String, elapsed_ms: u64 },

    #[error("malformed delta: {reason}")]
    MalformedDelta { reason: String },

    #[error("transport channel closed: {0}")]
    ChannelClosed(String),
}

impl SyncError {
    /// Retryable failures are resumed from the last acknowledged version
    /// vector on the next sync cycle. A malformed delta is a peer bug and
    /// retrying the same bytes cannot help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::MalformedDelta { .. })
    }
}
