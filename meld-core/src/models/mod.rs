//! Shared models: node identity, operation ids, conflict audit records.

pub mod conflict;
pub mod node;

pub use conflict::{ConflictRecord, MergeReport, ResolutionStrategy};
pub use node::{NodeId, OpId};
