//! Persistence: save snapshots of a world's thinkers, an append-only journal
//! of scheduling events, and a file-backed store with an integrity chain.
//!
//! # Invariants
//! - Snapshots are content-addressed and verified before they are restored.
//! - A save reloads with identical relative tick order.
//! - Every file the store writes is recorded in a SHA-256 hash chain; a
//!   mismatch fails closed.

mod error;
pub mod snapshot;
pub mod store;

pub use error::SaveError;
pub use snapshot::SaveSnapshot;
pub use store::{IntegrityManifest, ManifestEntry, SaveMeta, SaveStore};
