use crate::heap::Handle;
use crate::ring::BucketId;
use tickwork_common::{EntityId, StatNumError, WorldId};

/// Errors surfaced at the kernel's public boundary.
///
/// Most of these are programming errors (wrong world, double link, travel
/// out of order). They are reported instead of silently corrupting buckets.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    StatNum(#[from] StatNumError),
    #[error("stale entity handle {0}")]
    StaleHandle(Handle),
    #[error("entity {id} is already linked into {bucket}")]
    AlreadyLinked { id: EntityId, bucket: BucketId },
    #[error("entity {id} belongs to {owner:?}, not {world}")]
    WrongWorld {
        id: EntityId,
        owner: Option<WorldId>,
        world: WorldId,
    },
    #[error("entity {0} has been destroyed")]
    Destroyed(EntityId),
    #[error("entity {0} is not traveling")]
    NotTraveling(EntityId),
    #[error("entity {0} is already traveling")]
    AlreadyTraveling(EntityId),
    #[error("a step is already running in {0}")]
    StepInProgress(WorldId),
    #[error("entity {0} is inside one of its own hooks")]
    ThinkerBusy(EntityId),
    #[error("unknown thinker kind `{0}`")]
    UnknownKind(String),
    #[error("thinker kind mismatch: expected `{expected}`")]
    KindMismatch { expected: &'static str },
    #[error("duplicate entity id {0}")]
    DuplicateEntity(EntityId),
    #[error("{0} must be empty before a save is loaded into it")]
    WorldNotEmpty(WorldId),
    #[error("corrupt save topology: {0}")]
    CorruptTopology(String),
    #[error("thinker state error: {0}")]
    State(#[from] serde_json::Error),
}
