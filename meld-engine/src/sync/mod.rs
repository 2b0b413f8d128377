//! Peer synchronization: delta computation, transport, backoff, and
//! the per-peer session state machine.

pub mod backoff;
pub mod engine;
pub mod transport;
pub mod wire;
