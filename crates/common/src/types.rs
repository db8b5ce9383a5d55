use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Persistent identity of an entity.
///
/// Survives save/load and travel between worlds. Runtime access goes through
/// heap handles; this id is what saves and cross-world lookups key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group of the hyphenated form is enough to tell entities apart in logs.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

/// Identifier of a world (level). Chosen by the caller, e.g. a map number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}
