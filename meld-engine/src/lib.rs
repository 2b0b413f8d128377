//! Process-level machinery on top of the CRDT primitives: the instance
//! [`Manager`], the conflict [`Resolver`], and the peer [`SyncEngine`].
//!
//! The manager owns named CRDT instances and their op logs, the resolver
//! inspects merged states for semantic conflicts the merge itself cannot
//! express, and the sync engine ships op-log deltas between peers and
//! tracks per-peer acknowledgement clocks.

pub mod manager;
pub mod resolver;
pub mod sync;

pub use manager::Manager;
pub use resolver::{ConflictDetector, Resolver};
pub use sync::backoff::Backoff;
pub use sync::engine::{SyncEngine, SyncPhase};
pub use sync::transport::{ChannelTransport, PeerTransport};
pub use sync::wire::{AckMessage, DeltaMessage};
