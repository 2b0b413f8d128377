//! CRDT primitive data structures.
//!
//! Five conflict-free replicated data types, each exposing a type-specific
//! mutator, a pure query, and an infallible `merge` that is commutative,
//! associative, and idempotent.

pub mod gcounter;
pub mod gset;
pub mod lww_register;
pub mod or_set;
pub mod pncounter;

pub use gcounter::GCounter;
pub use gset::GSet;
pub use lww_register::LWWRegister;
pub use or_set::{AddTag, ORSet};
pub use pncounter::PNCounter;
