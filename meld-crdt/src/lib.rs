//! # meld-crdt
//!
//! State-based CRDT library: five primitives, three specialized types, a
//! closed tagged union dispatching a single `merge` contract, plus the
//! vector clock, operation log, and snapshot framing the replication
//! engine builds on.
//!
//! Every type here guarantees the same thing: `merge` is commutative,
//! associative, and idempotent, and never fails for two valid states of
//! the same kind. Replicas that exchange state in any order, any number
//! of times, converge.

pub mod clock;
pub mod op;
pub mod oplog;
pub mod primitives;
pub(crate) mod serde_pairs;
pub mod snapshot;
pub mod specialized;
pub mod state;

// Re-export the most commonly used types at the crate root.
pub use clock::VectorClock;
pub use op::{CrdtOp, Mutation};
pub use oplog::{OpLog, OpLogEntry};
pub use primitives::{AddTag, GCounter, GSet, LWWRegister, ORSet, PNCounter};
pub use specialized::{Aggregate, GraphCrdt, TimeSeries, Workflow};
pub use state::{CrdtKind, CrdtState};
