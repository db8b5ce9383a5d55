//! Developer tooling: read-only inspection of worlds and the heap.
//!
//! # Invariants
//! - Tools never mutate scheduler state.

pub mod inspector;

pub use inspector::{BucketInfo, EntityInfo, WorldInspector, WorldSummary};
