//! Shared types for the tickwork workspace: entity and world identity, status numbers.

mod stat;
mod types;

pub use stat::{StatNum, StatNumError, MAX_STATNUM};
pub use types::{EntityId, WorldId};
