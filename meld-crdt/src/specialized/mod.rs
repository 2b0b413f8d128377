//! Domain-shaped CRDTs built from the primitives.
//!
//! Each composes OR-Sets, LWW-Registers, and G-Sets while preserving the
//! same merge contract: commutative, associative, idempotent, infallible.

pub mod graph;
pub mod time_series;
pub mod workflow;

pub use graph::{Edge, EdgeRemoval, GraphCrdt};
pub use time_series::{Aggregate, Sample, TimeSeries};
pub use workflow::{TransitionRecord, Workflow};
