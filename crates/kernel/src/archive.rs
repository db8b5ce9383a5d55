use serde::{Deserialize, Serialize};
use tickwork_common::{EntityId, StatNum};

/// One thinker as written to a save: placement plus kind-encoded state.
///
/// A world serializes its records stable buckets first (ascending class,
/// ring order), then fresh buckets. Loading replays them in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkerRecord {
    pub id: EntityId,
    pub kind: String,
    pub stat: StatNum,
    /// Saved while still waiting in a fresh list.
    pub fresh: bool,
    pub began_play: bool,
    pub state: serde_json::Value,
}

impl ThinkerRecord {
    /// Position of this record's bucket in serialization order.
    pub(crate) fn bucket_rank(&self) -> usize {
        if self.fresh {
            StatNum::PASSIVE.index() + 1 + self.stat.index()
        } else {
            self.stat.index()
        }
    }
}
