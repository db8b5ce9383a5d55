//! Owning allocator for thinkers and the collector that reclaims them.
//!
//! Worlds never own thinkers; they hold ring membership only. The heap owns
//! every record, hands out generational [`Handle`]s, keeps a transit area for
//! entities between worlds, and reclaims destroyed or unreachable records in
//! [`Heap::collect`].

use crate::kind::{Kind, KindRegistry};
use crate::ring::{Membership, RingNodes};
use crate::thinker::{AsAny, Thinker};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tickwork_common::{EntityId, StatNum, WorldId};

/// Generational reference to a heap slot. Stale once the slot is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Scheduler-visible state of one thinker.
pub struct EntityRecord {
    pub(crate) id: EntityId,
    pub(crate) kind: &'static str,
    pub(crate) world: Option<WorldId>,
    pub(crate) stat: StatNum,
    pub(crate) membership: Option<Membership>,
    pub(crate) thinker: Option<Box<dyn Thinker>>,
    pub(crate) just_spawned: bool,
    pub(crate) pending_destroy: bool,
    pub(crate) destroy_notified: bool,
    pub(crate) began_play: bool,
    pub(crate) traveling: bool,
    /// Step during which the record was created, if created mid-step.
    pub(crate) birth_step: Option<u64>,
    pub(crate) last_ticked: Option<u64>,
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn world(&self) -> Option<WorldId> {
        self.world
    }

    pub fn stat(&self) -> StatNum {
        self.stat
    }

    pub fn membership(&self) -> Option<&Membership> {
        self.membership.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.membership.is_some()
    }

    pub fn is_just_spawned(&self) -> bool {
        self.just_spawned
    }

    pub fn is_pending_destroy(&self) -> bool {
        self.pending_destroy
    }

    pub fn has_begun_play(&self) -> bool {
        self.began_play
    }

    pub fn is_traveling(&self) -> bool {
        self.traveling
    }

    /// The behaviour object, unless it is currently running one of its hooks.
    pub fn thinker(&self) -> Option<&dyn Thinker> {
        self.thinker.as_deref()
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("world", &self.world)
            .field("stat", &self.stat)
            .field("membership", &self.membership)
            .field("just_spawned", &self.just_spawned)
            .field("pending_destroy", &self.pending_destroy)
            .field("traveling", &self.traveling)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    record: Option<EntityRecord>,
}

/// Result of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub marked: usize,
    pub swept: usize,
    pub live: usize,
}

/// Passed to [`Thinker::propagate_mark`] so a thinker can report what it keeps alive.
pub struct Marker<'a> {
    by_id: &'a HashMap<EntityId, Handle>,
    found: Vec<Handle>,
}

impl Marker<'_> {
    pub fn mark(&mut self, handle: Handle) {
        self.found.push(handle);
    }

    pub fn mark_id(&mut self, id: EntityId) {
        if let Some(&handle) = self.by_id.get(&id) {
            self.found.push(handle);
        }
    }
}

/// Arena of entity records shared by every world of a session.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<EntityId, Handle>,
    transit: BTreeSet<Handle>,
    kinds: KindRegistry,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(KindRegistry::new())
    }
}

impl Heap {
    pub fn new(kinds: KindRegistry) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            transit: BTreeSet::new(),
            kinds,
        }
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn kinds_mut(&mut self) -> &mut KindRegistry {
        &mut self.kinds
    }

    /// Number of records held, including destroyed ones awaiting collection.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Allocate an unlinked record under a fresh id. Link it with
    /// [`crate::World::link`].
    pub fn insert<T: Kind>(&mut self, thinker: T) -> Handle {
        self.kinds.register::<T>();
        let mut id = EntityId::new();
        while self.by_id.contains_key(&id) {
            id = EntityId::new();
        }
        self.alloc_slot(id, T::NAME, T::DEFAULT_STAT, Box::new(thinker))
    }

    /// Allocate an unlinked record that belongs to no world yet.
    pub(crate) fn alloc(
        &mut self,
        id: EntityId,
        kind: &'static str,
        stat: StatNum,
        thinker: Box<dyn Thinker>,
    ) -> Result<Handle, crate::KernelError> {
        if self.by_id.contains_key(&id) {
            return Err(crate::KernelError::DuplicateEntity(id));
        }
        Ok(self.alloc_slot(id, kind, stat, thinker))
    }

    fn alloc_slot(
        &mut self,
        id: EntityId,
        kind: &'static str,
        stat: StatNum,
        thinker: Box<dyn Thinker>,
    ) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.record = Some(EntityRecord {
            id,
            kind,
            world: None,
            stat,
            membership: None,
            thinker: Some(thinker),
            just_spawned: false,
            pending_destroy: false,
            destroy_notified: false,
            began_play: false,
            traveling: false,
            birth_step: None,
            last_ticked: None,
        });
        let handle = Handle {
            index,
            generation: slot.generation,
        };
        self.by_id.insert(id, handle);
        tracing::trace!(%id, %handle, kind, "allocated thinker");
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<&EntityRecord> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut EntityRecord> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// Record at a raw slot index, regardless of generation.
    pub(crate) fn record_at(&self, index: u32) -> Option<&EntityRecord> {
        self.slots.get(index as usize)?.record.as_ref()
    }

    pub(crate) fn record_at_mut(&mut self, index: u32) -> Option<&mut EntityRecord> {
        self.slots.get_mut(index as usize)?.record.as_mut()
    }

    /// Current handle of an occupied slot.
    pub(crate) fn handle_at(&self, index: u32) -> Option<Handle> {
        let slot = self.slots.get(index as usize)?;
        slot.record.as_ref().map(|_| Handle {
            index,
            generation: slot.generation,
        })
    }

    /// Whether the handle refers to a record that has not been destroyed.
    pub fn is_alive(&self, handle: Handle) -> bool {
        self.get(handle).is_some_and(|r| !r.pending_destroy)
    }

    pub fn find(&self, id: EntityId) -> Option<Handle> {
        self.by_id.get(&id).copied()
    }

    /// Borrow a thinker as its concrete kind.
    pub fn thinker<T: Kind>(&self, handle: Handle) -> Option<&T> {
        let thinker = self.get(handle)?.thinker.as_deref()?;
        <dyn Thinker as AsAny>::as_any(thinker).downcast_ref::<T>()
    }

    pub fn thinker_mut<T: Kind>(&mut self, handle: Handle) -> Option<&mut T> {
        let thinker = self.get_mut(handle)?.thinker.as_deref_mut()?;
        <dyn Thinker as AsAny>::as_any_mut(thinker).downcast_mut::<T>()
    }

    pub(crate) fn take_thinker(&mut self, handle: Handle) -> Option<Box<dyn Thinker>> {
        self.get_mut(handle)?.thinker.take()
    }

    pub(crate) fn put_thinker(&mut self, handle: Handle, thinker: Box<dyn Thinker>) {
        if let Some(record) = self.get_mut(handle) {
            debug_assert!(record.thinker.is_none());
            record.thinker = Some(thinker);
        }
    }

    /// Entities currently between worlds.
    pub fn transit(&self) -> impl Iterator<Item = Handle> + '_ {
        self.transit.iter().copied()
    }

    pub(crate) fn enter_transit(&mut self, handle: Handle) {
        self.transit.insert(handle);
    }

    pub(crate) fn leave_transit(&mut self, handle: Handle) -> bool {
        self.transit.remove(&handle)
    }

    /// Mark from `roots` and the transit area, then reclaim every record that
    /// was not reached and is not linked into a bucket.
    ///
    /// Destroyed records are never marked, so they are reclaimed on the first
    /// collection after their destruction. Records still linked somewhere are
    /// kept even when unreached; that means a world was left out of `roots`.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Handle>) -> GcStats {
        let _span = tracing::debug_span!("gc_collect").entered();
        let mut marked = vec![false; self.slots.len()];
        let mut stack: Vec<Handle> = roots.into_iter().collect();
        stack.extend(self.transit.iter().copied());

        let mut stats = GcStats::default();
        while let Some(handle) = stack.pop() {
            let Some(record) = self.get(handle) else {
                continue;
            };
            if record.pending_destroy || marked[handle.index as usize] {
                continue;
            }
            marked[handle.index as usize] = true;
            stats.marked += 1;
            if let Some(thinker) = record.thinker.as_deref() {
                let mut marker = Marker {
                    by_id: &self.by_id,
                    found: Vec::new(),
                };
                thinker.propagate_mark(&mut marker);
                stack.extend(marker.found);
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(record) = slot.record.as_ref() else {
                continue;
            };
            if marked[index] {
                continue;
            }
            if record.thinker.is_none() {
                // Out of the heap while one of its hooks runs.
                continue;
            }
            if record.membership.is_some() {
                tracing::warn!(
                    id = %record.id,
                    world = ?record.world,
                    "unreached thinker is still linked; was its world passed as a root?"
                );
                continue;
            }
            if !record.pending_destroy {
                tracing::debug!(id = %record.id, kind = record.kind, "reclaiming orphaned thinker");
            }
            self.by_id.remove(&record.id);
            slot.record = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            stats.swept += 1;
        }
        stats.live = self.by_id.len();
        tracing::debug!(marked = stats.marked, swept = stats.swept, live = stats.live, "gc complete");
        stats
    }
}

impl RingNodes for Heap {
    fn membership(&self, slot: u32) -> Option<&Membership> {
        self.record_at(slot)?.membership.as_ref()
    }

    fn membership_mut(&mut self, slot: u32) -> Option<&mut Option<Membership>> {
        self.record_at_mut(slot).map(|r| &mut r.membership)
    }
}
