use crate::SaveError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tickwork_common::WorldId;
use tickwork_kernel::{Handle, Heap, ThinkerRecord, World};

/// A content-addressed save of one world's thinkers at a specific tick.
///
/// `hash` is the SHA-256 of the CBOR encoding of every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSnapshot {
    pub world: WorldId,
    pub tick: u64,
    /// Seed at save time, for deterministic continuation.
    pub seed: u64,
    /// Whether player-controlled thinkers were included.
    pub keep_players: bool,
    /// Thinkers in serialization order.
    pub thinkers: Vec<ThinkerRecord>,
    pub hash: String,
}

#[derive(Serialize)]
struct Body<'a> {
    world: WorldId,
    tick: u64,
    seed: u64,
    keep_players: bool,
    thinkers: &'a [ThinkerRecord],
}

impl SaveSnapshot {
    /// Serialize a world's thinkers. Fails if a thinker is mid-hook or its
    /// state cannot be encoded.
    pub fn capture(world: &World, heap: &Heap, keep_players: bool) -> Result<Self, SaveError> {
        let thinkers = world.serialize(heap, keep_players)?;
        let mut snapshot = Self {
            world: world.id(),
            tick: world.tick(),
            seed: world.seed(),
            keep_players,
            thinkers,
            hash: String::new(),
        };
        snapshot.hash = snapshot.content_hash()?;
        tracing::debug!(
            world = %snapshot.world,
            tick = snapshot.tick,
            thinkers = snapshot.thinkers.len(),
            "captured save snapshot"
        );
        Ok(snapshot)
    }

    /// Recompute the content hash and compare.
    pub fn verify(&self) -> bool {
        self.content_hash().is_ok_and(|hash| hash == self.hash)
    }

    /// Rebuild the world in `heap`. Every saved kind must be registered in
    /// the heap's kind registry.
    pub fn restore(&self, heap: &mut Heap) -> Result<World, SaveError> {
        let mut world = World::new(self.world);
        self.restore_into(heap, &mut world)?;
        Ok(world)
    }

    /// Load into an existing empty world, keeping its configuration.
    pub fn restore_into(&self, heap: &mut Heap, world: &mut World) -> Result<Vec<Handle>, SaveError> {
        if !self.verify() {
            return Err(SaveError::IntegrityMismatch {
                expected: self.hash.clone(),
                actual: self.content_hash()?,
            });
        }
        let handles = world.deserialize(heap, self.thinkers.clone())?;
        world.restore_clock(self.tick, self.seed);
        // Restoring is not a scheduling mutation worth journaling.
        world.drain_events();
        Ok(handles)
    }

    fn content_hash(&self) -> Result<String, SaveError> {
        let body = Body {
            world: self.world,
            tick: self.tick,
            seed: self.seed,
            keep_players: self.keep_players,
            thinkers: &self.thinkers,
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&body, &mut bytes).map_err(|e| SaveError::CborEncode(e.to_string()))?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}
