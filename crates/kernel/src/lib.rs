//! Thinker kernel: per-class scheduling of entity behaviour for one or more
//! worlds sharing a heap.
//!
//! # Invariants
//! - A live thinker is linked into exactly one bucket of exactly one world,
//!   or is traveling and held in the heap's transit area.
//! - A thinker spawned during step N never ticks in step N.
//! - Classes tick in ascending order; within a class, in append order.
//! - Any hook may spawn, destroy or reclassify anything, itself included,
//!   without breaking the pass that is running it.

pub mod archive;
pub mod collection;
pub mod config;
pub mod cursor;
mod error;
pub mod heap;
pub mod kind;
pub mod ring;
pub mod thinker;
pub mod world;

#[cfg(test)]
mod testing;

pub use archive::ThinkerRecord;
pub use collection::ThinkerCollection;
pub use config::{ClassStats, SchedulerConfig, StepStats};
pub use cursor::{ThinkerIterator, TypedIterator};
pub use error::KernelError;
pub use heap::{EntityRecord, GcStats, Handle, Heap, Marker};
pub use kind::{Kind, KindRegistry};
pub use ring::BucketId;
pub use thinker::{AsAny, Context, Thinker};
pub use world::{World, WorldEvent};
