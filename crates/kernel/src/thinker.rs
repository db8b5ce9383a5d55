//! The scheduling contract between the kernel and entity behaviour.

use crate::heap::{Handle, Heap, Marker};
use crate::kind::Kind;
use crate::world::World;
use crate::KernelError;
use std::any::Any;
use tickwork_common::StatNum;

/// Object-safe access to `Any` for boxed thinkers.
///
/// Call it as `<dyn Thinker as AsAny>::as_any(t)`; method syntax on a box or
/// a reference would resolve to the container instead.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour driven by the scheduler.
///
/// While one of these hooks runs, the thinker's box is out of the heap:
/// `heap.thinker::<T>(cx.this())` returns `None` for the running thinker.
pub trait Thinker: AsAny {
    /// Called once per step while linked in a ticking class.
    fn tick(&mut self, _cx: &mut Context<'_>) {}

    /// Called once, just before the first tick.
    fn post_begin_play(&mut self, _cx: &mut Context<'_>) {}

    /// Called when the thinker is destroyed, after it has been unlinked.
    fn on_destroy(&mut self, _cx: &mut Context<'_>) {}

    /// Report every entity this thinker keeps alive.
    fn propagate_mark(&self, _marker: &mut Marker<'_>) {}

    /// Player-controlled thinkers are left out of saves taken without players.
    fn is_player(&self) -> bool {
        false
    }

    /// Called after the thinker has been restored from a save and relinked.
    fn post_serialize(&mut self) {}
}

/// What a running hook can reach: the heap, its own world, and itself.
pub struct Context<'a> {
    pub heap: &'a mut Heap,
    pub world: &'a mut World,
    this: Handle,
}

impl<'a> Context<'a> {
    pub(crate) fn new(heap: &'a mut Heap, world: &'a mut World, this: Handle) -> Self {
        Self { heap, world, this }
    }

    pub fn this(&self) -> Handle {
        self.this
    }

    /// Current step number of the world.
    pub fn tick(&self) -> u64 {
        self.world.tick()
    }

    /// Deterministic per-world random stream.
    pub fn random(&mut self) -> u64 {
        self.world.next_random()
    }

    pub fn spawn<T: Kind>(&mut self, thinker: T, stat: StatNum) -> Handle {
        self.world.spawn(self.heap, thinker, stat)
    }

    pub fn create<T: Kind>(&mut self, thinker: T) -> Handle {
        self.world.create(self.heap, thinker)
    }

    pub fn destroy(&mut self, target: Handle) -> Result<bool, KernelError> {
        self.world.destroy(self.heap, target)
    }

    pub fn destroy_self(&mut self) -> Result<bool, KernelError> {
        self.world.destroy(self.heap, self.this)
    }

    pub fn change_stat_num(&mut self, target: Handle, stat: i64) -> bool {
        self.world.change_stat_num(self.heap, target, stat)
    }

    pub fn is_alive(&self, target: Handle) -> bool {
        self.heap.is_alive(target)
    }
}
