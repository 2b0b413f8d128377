//! Error taxonomy for the replication core.
//!
//! Three concerns, three enums: registry misuse ([`RegistryError`]),
//! type-level validation rejections ([`CrdtError`]), and transport-layer
//! failures ([`SyncError`]). All unify under [`MeldError`].
//!
//! Merge itself has no error path: merging two valid states of the same
//! kind always succeeds. Semantic conflicts that survive a merge are not
//! errors either; they are recorded by the conflict resolver.

pub mod crdt_error;
pub mod registry_error;
pub mod sync_error;

pub use crdt_error::CrdtError;
pub use registry_error::RegistryError;
pub use sync_error::SyncError;

/// Top-level error for all Meld operations.
#[derive(Debug, thiserror::Error)]
pub enum MeldError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used across the workspace.
pub type MeldResult<T> = Result<T, MeldError>;

impl From<serde_json::Error> for MeldError {
    fn from(e: serde_json::Error) -> Self {
        MeldError::Serialization(e.to_string())
    }
}

impl MeldError {
    /// Whether the operation that produced this error may be retried
    /// without caller intervention. Only transport failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeldError::Sync(e) if e.is_retryable())
    }
}
