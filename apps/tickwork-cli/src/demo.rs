//! Demo thinker kinds driven by the CLI.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tickwork_common::StatNum;
use tickwork_kernel::{Context, Heap, Kind, KindRegistry, Thinker, World};

/// Abstract parent of every kind that has a position.
pub const ACTOR: &str = "Actor";

fn unit(bits: u64) -> f32 {
    ((bits >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

/// Emits a [`Puff`] every `every` ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spawner {
    pub origin: Vec3,
    pub every: u64,
    pub lifetime: u32,
    pub spawned: u32,
}

impl Thinker for Spawner {
    fn tick(&mut self, cx: &mut Context<'_>) {
        if self.every == 0 || cx.tick() % self.every != 0 {
            return;
        }
        let vel = Vec3::new(unit(cx.random()), unit(cx.random()), unit(cx.random()));
        cx.create(Puff {
            pos: self.origin,
            vel,
            life: self.lifetime,
        });
        self.spawned += 1;
    }
}

impl Kind for Spawner {
    const NAME: &'static str = "Spawner";
    const DEFAULT_STAT: StatNum = StatNum::FIRST_THINKING;
}

/// Drifts for `life` ticks, then destroys itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puff {
    pub pos: Vec3,
    pub vel: Vec3,
    pub life: u32,
}

impl Thinker for Puff {
    fn tick(&mut self, cx: &mut Context<'_>) {
        self.pos += self.vel;
        self.life = self.life.saturating_sub(1);
        if self.life == 0 {
            let _ = cx.destroy_self();
        }
    }
}

impl Kind for Puff {
    const NAME: &'static str = "Puff";
    const PARENT: Option<&'static str> = Some(ACTOR);
}

/// Walks in a straight line; left out of saves taken without players.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPawn {
    pub pos: Vec3,
    pub heading: Vec3,
}

impl Thinker for PlayerPawn {
    fn tick(&mut self, _cx: &mut Context<'_>) {
        self.pos += self.heading;
    }

    fn is_player(&self) -> bool {
        true
    }
}

impl Kind for PlayerPawn {
    const NAME: &'static str = "PlayerPawn";
    const PARENT: Option<&'static str> = Some(ACTOR);
    const DEFAULT_STAT: StatNum = StatNum::PLAYER;
}

/// Static light: tracked and saved, never ticked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Glow {
    pub pos: Vec3,
    pub color: Vec3,
}

impl Thinker for Glow {}

impl Kind for Glow {
    const NAME: &'static str = "Glow";
    const PARENT: Option<&'static str> = Some(ACTOR);
    const DEFAULT_STAT: StatNum = StatNum::PASSIVE;
}

/// Every demo kind, so saves can be loaded into a fresh heap.
pub fn registry() -> KindRegistry {
    let mut kinds = KindRegistry::new();
    kinds
        .register_abstract(ACTOR, None)
        .register::<Spawner>()
        .register::<Puff>()
        .register::<PlayerPawn>()
        .register::<Glow>();
    kinds
}

/// One spawner per `spawners`, a player, and a few lights.
pub fn populate(world: &mut World, heap: &mut Heap, spawners: usize) {
    for i in 0..spawners {
        world.create(
            heap,
            Spawner {
                origin: Vec3::new(i as f32 * 8.0, 0.0, 0.0),
                every: 1 + i as u64 % 3,
                lifetime: 5,
                spawned: 0,
            },
        );
    }
    world.create(
        heap,
        PlayerPawn {
            pos: Vec3::ZERO,
            heading: Vec3::X,
        },
    );
    for i in 0..3 {
        world.create(
            heap,
            Glow {
                pos: Vec3::new(0.0, 4.0, i as f32 * 4.0),
                color: Vec3::ONE,
            },
        );
    }
}
