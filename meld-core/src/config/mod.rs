//! Configuration for the replication core.

pub mod gc_config;
pub mod sync_config;

pub use gc_config::GcConfig;
pub use sync_config::SyncConfig;
