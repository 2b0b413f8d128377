//! # meld-core
//!
//! Foundation crate for the Meld replication core.
//! Defines the error taxonomy, configuration, and shared models.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod models;

// Re-export the most commonly used types at the crate root.
pub use config::{GcConfig, SyncConfig};
pub use errors::{CrdtError, MeldError, MeldResult, RegistryError, SyncError};
pub use models::{ConflictRecord, MergeReport, NodeId, OpId, ResolutionStrategy};
