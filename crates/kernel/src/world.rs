use crate::archive::ThinkerRecord;
use crate::collection::ThinkerCollection;
use crate::config::{ClassStats, SchedulerConfig, StepStats};
use crate::heap::{Handle, Heap};
use crate::kind::Kind;
use crate::ring::{BucketId, Link};
use crate::thinker::{Context, Thinker};
use crate::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tickwork_common::{EntityId, StatNum, WorldId};

/// An event record produced by every scheduling mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Spawned {
        id: EntityId,
        kind: String,
        stat: StatNum,
    },
    Destroyed {
        id: EntityId,
    },
    StatChanged {
        id: EntityId,
        from: StatNum,
        to: StatNum,
    },
    /// Entity left this world for the transit area.
    Departed {
        id: EntityId,
    },
    /// Entity arrived from the transit area.
    Arrived {
        id: EntityId,
        stat: StatNum,
    },
    /// One step ran with the given seed.
    Stepped {
        tick: u64,
        seed: u64,
        ticked: usize,
    },
    Loaded {
        count: usize,
    },
}

/// A level: owns the per-class buckets of its thinkers and steps them.
///
/// Thinker records live in the [`Heap`], which every call takes explicitly.
/// Several worlds can share one heap; each only ever touches records whose
/// `world` is its own id.
///
/// Seeded like a replayable simulation: the seed advances through
/// splitmix64 once per step, and [`World::next_random`] draws from a stream
/// restarted from that seed at the beginning of every step.
#[derive(Debug)]
pub struct World {
    id: WorldId,
    tick: u64,
    seed: u64,
    rng: u64,
    stepping: bool,
    thinkers: ThinkerCollection,
    config: SchedulerConfig,
    event_log: Vec<WorldEvent>,
}

impl World {
    pub fn new(id: WorldId) -> Self {
        Self::with_seed(id, 0)
    }

    pub fn with_seed(id: WorldId, seed: u64) -> Self {
        Self::with_config(id, seed, SchedulerConfig::default())
    }

    pub fn with_config(id: WorldId, seed: u64, config: SchedulerConfig) -> Self {
        Self {
            id,
            tick: 0,
            seed,
            rng: seed,
            stepping: false,
            thinkers: ThinkerCollection::new(),
            config,
            event_log: Vec::new(),
        }
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Number of completed steps.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SchedulerConfig {
        &mut self.config
    }

    /// Whether a step is running right now.
    pub fn is_stepping(&self) -> bool {
        self.stepping
    }

    pub fn thinkers(&self) -> &ThinkerCollection {
        &self.thinkers
    }

    /// Linked thinkers, stable and fresh.
    pub fn len(&self) -> usize {
        self.thinkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thinkers.is_empty()
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Set the clock directly (used when a save is restored).
    pub fn restore_clock(&mut self, tick: u64, seed: u64) {
        self.tick = tick;
        self.seed = seed;
        self.rng = seed;
    }

    pub fn next_random(&mut self) -> u64 {
        self.rng = splitmix64(self.rng);
        self.rng
    }

    /// Allocate `thinker` and link it at `stat`. A thinker spawned during a
    /// step first ticks in the next one.
    pub fn spawn<T: Kind>(&mut self, heap: &mut Heap, thinker: T, stat: StatNum) -> Handle {
        let handle = heap.insert(thinker);
        self.attach(heap, handle, stat);
        self.log_spawn(heap, handle, stat);
        handle
    }

    /// Spawn at the kind's default class.
    pub fn create<T: Kind>(&mut self, heap: &mut Heap, thinker: T) -> Handle {
        self.spawn(heap, thinker, T::DEFAULT_STAT)
    }

    /// Link an allocated but unlinked record (see [`Heap::insert`]).
    pub fn link(
        &mut self,
        heap: &mut Heap,
        target: Handle,
        stat: StatNum,
    ) -> Result<BucketId, KernelError> {
        let record = heap.get(target).ok_or(KernelError::StaleHandle(target))?;
        let id = record.id;
        if record.pending_destroy {
            return Err(KernelError::Destroyed(id));
        }
        if let Some(m) = record.membership {
            return Err(KernelError::AlreadyLinked {
                id,
                bucket: m.bucket,
            });
        }
        if record.traveling {
            return Err(KernelError::AlreadyTraveling(id));
        }
        if record.world.is_some_and(|w| w != self.id) {
            return Err(KernelError::WrongWorld {
                id,
                owner: record.world,
                world: self.id,
            });
        }
        let bucket = self.attach(heap, target, stat);
        self.log_spawn(heap, target, stat);
        Ok(bucket)
    }

    fn attach(&mut self, heap: &mut Heap, target: Handle, stat: StatNum) -> BucketId {
        if let Some(record) = heap.get_mut(target) {
            record.world = Some(self.id);
            record.stat = stat;
            record.just_spawned = !stat.is_passive();
            record.birth_step = self.stepping.then_some(self.tick);
            // Step numbers are per world; a stamp from elsewhere means nothing here.
            record.last_ticked = None;
        }
        self.thinkers.link(heap, target.index(), stat)
    }

    fn log_spawn(&mut self, heap: &Heap, target: Handle, stat: StatNum) {
        if let Some(record) = heap.get(target) {
            tracing::trace!(id = %record.id, kind = record.kind, %stat, world = %self.id, "linked thinker");
            self.event_log.push(WorldEvent::Spawned {
                id: record.id,
                kind: record.kind.to_string(),
                stat,
            });
        }
    }

    /// Unlink and mark destroyed, then run `on_destroy`. The record stays in
    /// the heap until the next collection. Returns `false` if it was already
    /// destroyed.
    ///
    /// When the target is inside one of its own hooks, `on_destroy` runs as
    /// soon as that hook returns.
    pub fn destroy(&mut self, heap: &mut Heap, target: Handle) -> Result<bool, KernelError> {
        let record = heap.get_mut(target).ok_or(KernelError::StaleHandle(target))?;
        if record.pending_destroy {
            return Ok(false);
        }
        if record.world != Some(self.id) {
            return Err(KernelError::WrongWorld {
                id: record.id,
                owner: record.world,
                world: self.id,
            });
        }
        let id = record.id;
        record.pending_destroy = true;
        let traveling = std::mem::replace(&mut record.traveling, false);
        if traveling {
            heap.leave_transit(target);
        }
        self.thinkers.unlink(heap, target.index());
        self.event_log.push(WorldEvent::Destroyed { id });
        tracing::debug!(%id, world = %self.id, "destroyed thinker");

        if let Some(mut thinker) = heap.take_thinker(target) {
            if let Some(record) = heap.get_mut(target) {
                record.destroy_notified = true;
            }
            thinker.on_destroy(&mut Context::new(heap, self, target));
            heap.put_thinker(target, thinker);
        }
        Ok(true)
    }

    /// Move a linked thinker to the stable bucket of another ticking class.
    ///
    /// Returns `false` without doing anything when `stat` is out of range,
    /// equal to the current class, or when either side is the passive
    /// class.
    pub fn change_stat_num(&mut self, heap: &mut Heap, target: Handle, stat: i64) -> bool {
        let Ok(to) = StatNum::ticking(stat) else {
            tracing::debug!(stat, "ignoring class change to a non-ticking class");
            return false;
        };
        let Some(record) = heap.get(target) else {
            return false;
        };
        if record.world != Some(self.id) || record.pending_destroy || record.membership.is_none() {
            return false;
        }
        let (id, from) = (record.id, record.stat);
        if from == to || from.is_passive() {
            return false;
        }
        self.thinkers.unlink(heap, target.index());
        self.thinkers.place(heap, target.index(), BucketId::stable(to));
        if let Some(record) = heap.get_mut(target) {
            record.stat = to;
            record.just_spawned = false;
        }
        tracing::trace!(%id, %from, %to, "changed class");
        self.event_log.push(WorldEvent::StatChanged { id, from, to });
        true
    }

    /// Run one step: tick every stable class in ascending order, then fold
    /// the fresh lists onto the stable ones.
    ///
    /// Fresh lists are also folded before the pass, so thinkers spawned
    /// between steps tick in the very next step.
    pub fn run_step(&mut self, heap: &mut Heap) -> Result<StepStats, KernelError> {
        if self.stepping {
            return Err(KernelError::StepInProgress(self.id));
        }
        let started = Instant::now();
        let mut stats = StepStats {
            settled: self.settle_fresh(heap),
            ..StepStats::default()
        };

        self.tick += 1;
        self.seed = splitmix64(self.seed);
        self.rng = self.seed;
        stats.tick = self.tick;
        let _span = tracing::info_span!("run_step", world = %self.id, tick = self.tick).entered();

        self.stepping = true;
        for stat in StatNum::ticking_classes() {
            if self.thinkers.ring(BucketId::stable(stat)).is_empty() {
                continue;
            }
            let class_started = self.config.profile.then(Instant::now);
            let ticked = self.advance(heap, stat);
            stats.ticked += ticked;
            if let Some(class_started) = class_started {
                stats.classes.push(ClassStats {
                    stat,
                    ticked,
                    elapsed: class_started.elapsed(),
                });
            }
        }
        self.stepping = false;

        stats.settled += self.settle_fresh(heap);
        stats.elapsed = started.elapsed();
        self.event_log.push(WorldEvent::Stepped {
            tick: self.tick,
            seed: self.seed,
            ticked: stats.ticked,
        });
        tracing::debug!(ticked = stats.ticked, settled = stats.settled, "step complete");
        Ok(stats)
    }

    fn settle_fresh(&mut self, heap: &mut Heap) -> usize {
        let mut settled = 0;
        for stat in StatNum::ticking_classes() {
            for slot in self.thinkers.fold_fresh(heap, stat) {
                if let Some(record) = heap.record_at_mut(slot) {
                    record.just_spawned = false;
                }
                settled += 1;
            }
        }
        settled
    }

    /// Tick pass over one stable bucket. The successor is captured before
    /// each hook runs and kept in a guard, so hooks may unlink anything.
    fn advance(&mut self, heap: &mut Heap, stat: StatNum) -> usize {
        let bucket = BucketId::stable(stat);
        let guard = self.thinkers.push_guard(bucket);
        let mut ticked = 0;
        let mut at = self.thinkers.ring(bucket).first();
        while let Link::Node(slot) = at {
            let next = self.thinkers.next_link(heap, bucket, at);
            self.thinkers.set_guard(&guard, next);
            if self.tick_one(heap, slot) {
                ticked += 1;
            }
            at = self.thinkers.guard(&guard);
        }
        self.thinkers.pop_guard(guard);
        ticked
    }

    fn tick_one(&mut self, heap: &mut Heap, slot: u32) -> bool {
        let tick = self.tick;
        let Some(handle) = heap.handle_at(slot) else {
            return false;
        };
        let Some(record) = heap.get_mut(handle) else {
            return false;
        };
        if record.pending_destroy
            || record.birth_step == Some(tick)
            || record.last_ticked == Some(tick)
        {
            return false;
        }
        let Some(mut thinker) = record.thinker.take() else {
            return false;
        };
        record.last_ticked = Some(tick);
        let first = !record.began_play;
        record.began_play = true;

        let mut cx = Context::new(heap, self, handle);
        if first {
            thinker.post_begin_play(&mut cx);
        }
        if cx.heap.is_alive(handle) {
            thinker.tick(&mut cx);
        }
        self.return_thinker(heap, handle, thinker);
        true
    }

    /// Put a thinker back after its hook ran, delivering a destroy
    /// notification that arrived while it was out.
    fn return_thinker(&mut self, heap: &mut Heap, handle: Handle, mut thinker: Box<dyn Thinker>) {
        let owed = heap
            .get(handle)
            .is_some_and(|r| r.pending_destroy && !r.destroy_notified);
        if owed {
            if let Some(record) = heap.get_mut(handle) {
                record.destroy_notified = true;
            }
            thinker.on_destroy(&mut Context::new(heap, self, handle));
        }
        heap.put_thinker(handle, thinker);
    }

    /// Destroy every thinker of one class, stable and fresh. Sweeps repeat
    /// while destroy hooks keep adding members, up to the configured limit.
    pub fn destroy_class(&mut self, heap: &mut Heap, stat: StatNum) -> usize {
        let mut total = 0;
        for _ in 0..self.config.destroy_pass_limit {
            let mut pass = self.destroy_bucket(heap, BucketId::stable(stat));
            if !stat.is_passive() {
                pass += self.destroy_bucket(heap, BucketId::fresh(stat));
            }
            total += pass;
            if pass == 0 {
                return total;
            }
        }
        tracing::warn!(%stat, world = %self.id, "class still populated after destroy pass limit");
        total
    }

    /// Destroy every thinker in every bucket, repeating full passes until a
    /// pass destroys nothing.
    pub fn destroy_all(&mut self, heap: &mut Heap) -> usize {
        let mut total = 0;
        for _ in 0..self.config.destroy_pass_limit {
            let mut pass = 0;
            for bucket in ThinkerCollection::buckets() {
                pass += self.destroy_bucket(heap, bucket);
            }
            total += pass;
            if pass == 0 {
                break;
            }
        }
        if !self.thinkers.is_empty() {
            tracing::warn!(
                world = %self.id,
                remaining = self.thinkers.len(),
                "thinkers survived teardown"
            );
        }
        tracing::debug!(world = %self.id, destroyed = total, "destroyed all thinkers");
        total
    }

    /// Destroy everything and drop the world.
    pub fn teardown(mut self, heap: &mut Heap) -> usize {
        self.destroy_all(heap)
    }

    fn destroy_bucket(&mut self, heap: &mut Heap, bucket: BucketId) -> usize {
        let guard = self.thinkers.push_guard(bucket);
        let mut destroyed = 0;
        let mut at = self.thinkers.ring(bucket).first();
        while let Link::Node(slot) = at {
            let next = self.thinkers.next_link(heap, bucket, at);
            self.thinkers.set_guard(&guard, next);
            if let Some(handle) = heap.handle_at(slot) {
                if matches!(self.destroy(heap, handle), Ok(true)) {
                    destroyed += 1;
                }
            }
            at = self.thinkers.guard(&guard);
        }
        self.thinkers.pop_guard(guard);
        destroyed
    }

    /// Every linked thinker, for [`Heap::collect`].
    pub fn report_roots(&self, heap: &Heap) -> Vec<Handle> {
        self.thinkers.all_handles(heap)
    }

    pub fn first_thinker(&self, heap: &Heap, stat: StatNum) -> Option<Handle> {
        self.thinkers.first_thinker(heap, stat)
    }

    /// Records for every linked thinker in serialization order. Players are
    /// left out unless `keep_players` is set.
    pub fn serialize(
        &self,
        heap: &Heap,
        keep_players: bool,
    ) -> Result<Vec<ThinkerRecord>, KernelError> {
        let mut out = Vec::with_capacity(self.thinkers.len());
        let mut skipped = 0;
        for bucket in ThinkerCollection::buckets() {
            for handle in self.thinkers.handles(heap, bucket) {
                let record = heap.get(handle).ok_or(KernelError::StaleHandle(handle))?;
                let thinker = record.thinker().ok_or(KernelError::ThinkerBusy(record.id))?;
                if !keep_players && thinker.is_player() {
                    skipped += 1;
                    continue;
                }
                out.push(ThinkerRecord {
                    id: record.id,
                    kind: record.kind.to_string(),
                    stat: bucket.stat,
                    fresh: bucket.fresh,
                    began_play: record.began_play,
                    state: heap.kinds().save(record.kind, thinker)?,
                });
            }
        }
        tracing::debug!(world = %self.id, saved = out.len(), skipped, "serialized thinkers");
        Ok(out)
    }

    /// Restore records produced by [`World::serialize`] into this (empty)
    /// world. Every record is validated and decoded before anything is
    /// allocated, so a failed load leaves the heap untouched.
    pub fn deserialize(
        &mut self,
        heap: &mut Heap,
        records: Vec<ThinkerRecord>,
    ) -> Result<Vec<Handle>, KernelError> {
        if !self.thinkers.is_empty() {
            return Err(KernelError::WorldNotEmpty(self.id));
        }
        let mut seen = HashSet::with_capacity(records.len());
        let mut rank = 0;
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            if record.fresh && record.stat.is_passive() {
                return Err(KernelError::CorruptTopology(format!(
                    "{} is fresh in the passive class",
                    record.id
                )));
            }
            if record.bucket_rank() < rank {
                return Err(KernelError::CorruptTopology(format!(
                    "{} is out of bucket order",
                    record.id
                )));
            }
            rank = record.bucket_rank();
            if !seen.insert(record.id) || heap.find(record.id).is_some() {
                return Err(KernelError::DuplicateEntity(record.id));
            }
            let bucket = BucketId {
                stat: record.stat,
                fresh: record.fresh,
            };
            let (kind, thinker) = heap.kinds().load(&record.kind, record.state)?;
            staged.push((record.id, kind, bucket, record.began_play, thinker));
        }

        let mut handles = Vec::with_capacity(staged.len());
        for (id, kind, bucket, began_play, thinker) in staged {
            let handle = heap.alloc(id, kind, bucket.stat, thinker)?;
            if let Some(record) = heap.get_mut(handle) {
                record.world = Some(self.id);
                record.just_spawned = bucket.fresh;
                record.began_play = began_play;
            }
            self.thinkers.place(heap, handle.index(), bucket);
            handles.push(handle);
        }
        for &handle in &handles {
            if let Some(mut thinker) = heap.take_thinker(handle) {
                thinker.post_serialize();
                heap.put_thinker(handle, thinker);
            }
        }
        tracing::debug!(world = %self.id, count = handles.len(), "deserialized thinkers");
        self.event_log.push(WorldEvent::Loaded {
            count: handles.len(),
        });
        Ok(handles)
    }

    /// Unlink a thinker and park it in the heap's transit area.
    pub fn begin_travel(&mut self, heap: &mut Heap, target: Handle) -> Result<(), KernelError> {
        let record = heap.get(target).ok_or(KernelError::StaleHandle(target))?;
        let id = record.id;
        if record.pending_destroy {
            return Err(KernelError::Destroyed(id));
        }
        if record.traveling {
            return Err(KernelError::AlreadyTraveling(id));
        }
        if record.world != Some(self.id) {
            return Err(KernelError::WrongWorld {
                id,
                owner: record.world,
                world: self.id,
            });
        }
        self.thinkers.unlink(heap, target.index());
        if let Some(record) = heap.get_mut(target) {
            record.traveling = true;
            record.just_spawned = false;
        }
        heap.enter_transit(target);
        tracing::debug!(%id, from = %self.id, "thinker departed");
        self.event_log.push(WorldEvent::Departed { id });
        Ok(())
    }

    /// Take a traveling thinker out of transit and link it here at `stat`.
    pub fn end_travel(
        &mut self,
        heap: &mut Heap,
        target: Handle,
        stat: StatNum,
    ) -> Result<BucketId, KernelError> {
        let record = heap.get_mut(target).ok_or(KernelError::StaleHandle(target))?;
        let id = record.id;
        if !record.traveling {
            return Err(KernelError::NotTraveling(id));
        }
        record.traveling = false;
        let bucket = self.attach(heap, target, stat);
        heap.leave_transit(target);
        tracing::debug!(%id, to = %self.id, %bucket, "thinker arrived");
        self.event_log.push(WorldEvent::Arrived { id, stat });
        Ok(bucket)
    }

    /// Entity ids per non-empty bucket, in serialization order.
    pub fn topology(&self, heap: &Heap) -> Vec<(BucketId, Vec<EntityId>)> {
        ThinkerCollection::buckets()
            .filter(|&bucket| !self.thinkers.ring(bucket).is_empty())
            .map(|bucket| {
                let ids = self
                    .thinkers
                    .handles(heap, bucket)
                    .into_iter()
                    .filter_map(|h| heap.get(h).map(|r| r.id))
                    .collect();
                (bucket, ids)
            })
            .collect()
    }

    /// Deterministic hash of clock and bucket order, for comparing runs.
    pub fn topology_hash(&self, heap: &Heap) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        mix(&mut h, &self.seed.to_le_bytes());
        for (bucket, ids) in self.topology(heap) {
            mix(&mut h, &[bucket.stat.get(), bucket.fresh as u8]);
            for id in ids {
                mix(&mut h, id.0.as_bytes());
            }
        }
        h
    }
}

/// Splitmix64 step; advances the world seed each tick.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Action, Lamp, Probe};

    fn stat(n: i64) -> StatNum {
        StatNum::new(n).unwrap()
    }

    fn probe(heap: &Heap, h: Handle) -> &Probe {
        heap.thinker::<Probe>(h).unwrap()
    }

    fn id_of(heap: &Heap, h: Handle) -> EntityId {
        heap.get(h).unwrap().id()
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new(WorldId(1));
        assert_eq!(w.tick(), 0);
        assert!(w.is_empty());
        assert!(w.events().is_empty());
    }

    #[test]
    fn spawn_during_tick_waits_for_next_step() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        w.spawn(
            &mut heap,
            Probe::logged("A", &log).then(Action::Spawn {
                name: "D".into(),
                stat: stat(5),
            }),
            stat(5),
        );
        w.spawn(&mut heap, Probe::logged("B", &log), stat(5));
        w.spawn(&mut heap, Probe::logged("C", &log), stat(10));

        let stats = w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "B", "C"]);
        assert_eq!(stats.ticked, 3);

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "B", "D", "C"]);
    }

    #[test]
    fn destroying_the_next_thinker_mid_pass() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        let a = w.spawn(&mut heap, Probe::logged("A", &log), stat(5));
        let b = w.spawn(&mut heap, Probe::logged("B", &log), stat(5));
        let c = w.spawn(&mut heap, Probe::logged("C", &log), stat(5));
        let b_id = id_of(&heap, b);
        heap.thinker_mut::<Probe>(a).unwrap().actions.push(Action::Destroy(b_id));

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "C"]);
        assert_eq!(probe(&heap, b).ticks, 0);
        assert_eq!(probe(&heap, b).destroyed, 1);
        assert_eq!(probe(&heap, c).ticks, 1);
        assert!(!heap.is_alive(b));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn destroying_an_already_ticked_thinker_mid_pass() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        let a = w.spawn(&mut heap, Probe::logged("A", &log), stat(5));
        let b = w.spawn(&mut heap, Probe::logged("B", &log), stat(5));
        w.spawn(&mut heap, Probe::logged("C", &log), stat(5));
        let a_id = id_of(&heap, a);
        heap.thinker_mut::<Probe>(b).unwrap().actions.push(Action::Destroy(a_id));

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "B", "C"]);
        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["B", "C"]);
    }

    #[test]
    fn self_destruction_notifies_after_the_tick() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        let a = w.spawn(
            &mut heap,
            Probe::logged("A", &log).then(Action::DestroySelf),
            stat(5),
        );
        w.spawn(&mut heap, Probe::logged("B", &log), stat(5));

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "B"]);
        let a_probe = probe(&heap, a);
        assert_eq!(a_probe.ticks, 1);
        assert_eq!(a_probe.destroyed, 1);
        assert!(heap.get(a).unwrap().is_pending_destroy());

        heap.collect(w.report_roots(&heap));
        assert!(heap.get(a).is_none());
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn post_begin_play_runs_once_before_first_tick() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let a = w.spawn(&mut heap, Probe::named("A"), stat(5));
        assert!(!heap.get(a).unwrap().has_begun_play());
        for _ in 0..3 {
            w.run_step(&mut heap).unwrap();
        }
        assert_eq!(probe(&heap, a).begun, 1);
        assert_eq!(probe(&heap, a).ticks, 3);
        assert!(heap.get(a).unwrap().has_begun_play());
    }

    #[test]
    fn moving_to_a_later_class_does_not_tick_twice() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        let a = w.spawn(&mut heap, Probe::logged("A", &log), stat(5));
        w.spawn(&mut heap, Probe::logged("B", &log), stat(10));
        let a_id = id_of(&heap, a);
        heap.thinker_mut::<Probe>(a)
            .unwrap()
            .actions
            .push(Action::ChangeStat {
                target: a_id,
                stat: 10,
            });

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "B"]);
        assert_eq!(heap.get(a).unwrap().stat(), stat(10));

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["B", "A"]);
    }

    #[test]
    fn reclassified_newcomer_still_waits_a_step() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        w.spawn(
            &mut heap,
            Probe::logged("A", &log).then(Action::SpawnAndMove {
                name: "N".into(),
                stat: stat(5),
                to: 20,
            }),
            stat(5),
        );

        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A"]);
        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["A", "N"]);
    }

    #[test]
    fn change_stat_num_rejections_are_silent() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let a = w.spawn(&mut heap, Probe::named("A"), stat(5));
        let lamp = w.create(&mut heap, Lamp::default());

        assert!(!w.change_stat_num(&mut heap, a, 5));
        assert!(!w.change_stat_num(&mut heap, a, -1));
        assert!(!w.change_stat_num(&mut heap, a, 500));
        assert!(!w.change_stat_num(&mut heap, a, StatNum::PASSIVE.get() as i64));
        assert!(!w.change_stat_num(&mut heap, lamp, 5));
        assert_eq!(heap.get(a).unwrap().stat(), stat(5));
        assert!(heap.get(a).unwrap().is_just_spawned());

        assert!(w.change_stat_num(&mut heap, a, 7));
        let record = heap.get(a).unwrap();
        assert_eq!(record.stat(), stat(7));
        assert!(!record.is_just_spawned());
        assert_eq!(w.first_thinker(&heap, stat(7)), Some(a));
    }

    #[test]
    fn passive_thinkers_never_tick() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let lamp = w.create(&mut heap, Lamp::default());
        assert_eq!(w.first_thinker(&heap, StatNum::PASSIVE), Some(lamp));
        for _ in 0..3 {
            w.run_step(&mut heap).unwrap();
        }
        assert_eq!(heap.thinker::<Lamp>(lamp).unwrap().ticks, 0);
        assert!(w.report_roots(&heap).contains(&lamp));
    }

    #[test]
    fn equal_class_ticks_in_append_order() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let log = testing::log();
        for name in ["1", "2", "3", "4"] {
            w.spawn(&mut heap, Probe::logged(name, &log), StatNum::DEFAULT);
        }
        w.spawn(&mut heap, Probe::logged("early", &log), StatNum::INFO);
        w.run_step(&mut heap).unwrap();
        assert_eq!(testing::entries(&log), ["early", "1", "2", "3", "4"]);
    }

    #[test]
    fn nested_step_is_refused() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(7));
        let a = w.spawn(&mut heap, Probe::named("A").then(Action::Step), stat(5));
        w.run_step(&mut heap).unwrap();
        let outcome = probe(&heap, a).nested_step.clone().unwrap();
        assert!(outcome.contains("already running"), "{outcome}");
        assert_eq!(w.tick(), 1);
        assert!(!w.is_stepping());
    }

    #[test]
    fn destroy_all_repeats_until_handlers_stop_spawning() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        w.spawn(
            &mut heap,
            Probe::named("A").when_destroyed(Action::Spawn {
                name: "ghost".into(),
                stat: stat(3),
            }),
            stat(50),
        );
        w.spawn(&mut heap, Probe::named("B"), stat(5));
        w.create(&mut heap, Lamp::default());

        assert_eq!(w.destroy_all(&mut heap), 4);
        assert!(w.is_empty());
        let stats = heap.collect(w.report_roots(&heap));
        assert_eq!(stats.live, 0);
    }

    #[test]
    fn destroy_all_stops_at_the_pass_limit() {
        let mut heap = Heap::default();
        let config = SchedulerConfig {
            destroy_pass_limit: 3,
            ..SchedulerConfig::default()
        };
        let mut w = World::with_config(WorldId(1), 0, config);
        let undying = Probe::named("undying").when_destroyed(Action::Respawn { stat: stat(1) });
        w.spawn(&mut heap, undying, stat(1));
        let destroyed = w.destroy_all(&mut heap);
        assert_eq!(destroyed, 3);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn destroy_class_leaves_other_classes() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.run_step(&mut heap).unwrap();
        w.spawn(&mut heap, Probe::named("fresh"), stat(5));
        let keep = w.spawn(&mut heap, Probe::named("keep"), stat(6));

        assert_eq!(w.destroy_class(&mut heap, stat(5)), 2);
        assert_eq!(w.report_roots(&heap), vec![keep]);
    }

    #[test]
    fn teardown_destroys_everything() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let a = w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.create(&mut heap, Lamp::default());
        assert_eq!(w.teardown(&mut heap), 2);
        assert_eq!(probe(&heap, a).destroyed, 1);
        let stats = heap.collect(std::iter::empty());
        assert_eq!(stats.swept, 2);
    }

    #[test]
    fn link_errors_are_reported() {
        let mut heap = Heap::default();
        let mut w1 = World::new(WorldId(1));
        let mut w2 = World::new(WorldId(2));
        let a = w1.spawn(&mut heap, Probe::named("A"), stat(5));
        assert!(matches!(
            w1.link(&mut heap, a, stat(5)),
            Err(KernelError::AlreadyLinked { .. })
        ));
        assert!(matches!(
            w2.destroy(&mut heap, a),
            Err(KernelError::WrongWorld { .. })
        ));

        let loose = heap.insert(Probe::named("loose"));
        assert_eq!(
            w2.link(&mut heap, loose, StatNum::PASSIVE).unwrap(),
            BucketId::stable(StatNum::PASSIVE)
        );
        assert!(w1.destroy(&mut heap, a).unwrap());
        assert!(!w1.destroy(&mut heap, a).unwrap());
        assert!(matches!(
            w1.link(&mut heap, a, stat(5)),
            Err(KernelError::Destroyed(_))
        ));
    }

    #[test]
    fn out_of_range_classes_are_errors() {
        let err = StatNum::new(129).unwrap_err();
        assert_eq!(KernelError::from(err).to_string(), "status number 129 is outside 0..=128");
    }

    #[test]
    fn save_round_trip_restores_order_and_skips_players() {
        let mut heap = Heap::default();
        let mut w = World::with_seed(WorldId(1), 9);
        let a = w.spawn(&mut heap, Probe::named("A"), stat(5));
        let b = w.spawn(&mut heap, Probe::named("B"), stat(5));
        let player = w.spawn(&mut heap, Probe::named("P").player(), StatNum::PLAYER);
        w.run_step(&mut heap).unwrap();
        let c = w.spawn(&mut heap, Probe::named("C"), stat(5));
        let lamp = w.create(&mut heap, Lamp::default());

        let all = w.serialize(&heap, true).unwrap();
        assert_eq!(all.len(), 5);
        let records = w.serialize(&heap, false).unwrap();
        let ids: Vec<EntityId> = records.iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            [a, b, lamp, c].map(|h| id_of(&heap, h)).to_vec()
        );
        assert!(records[3].fresh);
        assert!(records[0].began_play);
        assert!(!ids.contains(&id_of(&heap, player)));

        let mut heap2 = Heap::default();
        heap2.kinds_mut().register::<Probe>().register::<Lamp>();
        let mut restored = World::new(WorldId(1));
        restored.restore_clock(w.tick(), w.seed());
        let handles = restored.deserialize(&mut heap2, records).unwrap();
        assert_eq!(handles.len(), 4);
        assert_eq!(heap2.thinker::<Probe>(handles[0]).unwrap().ticks, 1);
        assert!(heap2.get(handles[3]).unwrap().is_just_spawned());
        assert!(heap2.get(handles[0]).unwrap().has_begun_play());

        restored.run_step(&mut heap2).unwrap();
        let order = restored.topology(&heap2);
        assert_eq!(order[0].1, [a, b, c].map(|h| id_of(&heap, h)).to_vec());
        // Already-started probes are not begun again.
        assert_eq!(heap2.thinker::<Probe>(handles[0]).unwrap().begun, 1);
        assert_eq!(heap2.thinker::<Probe>(handles[3]).unwrap().begun, 1);
    }

    #[test]
    fn identical_worlds_hash_identically() {
        let mut heap = Heap::default();
        let mut w = World::with_seed(WorldId(1), 3);
        w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.create(&mut heap, Lamp::default());
        w.run_step(&mut heap).unwrap();

        let mut heap2 = Heap::default();
        heap2.kinds_mut().register::<Probe>().register::<Lamp>();
        let mut copy = World::new(WorldId(1));
        copy.restore_clock(w.tick(), w.seed());
        copy.deserialize(&mut heap2, w.serialize(&heap, true).unwrap())
            .unwrap();
        assert_eq!(copy.topology_hash(&heap2), w.topology_hash(&heap));

        w.run_step(&mut heap).unwrap();
        assert_ne!(copy.topology_hash(&heap2), w.topology_hash(&heap));
    }

    #[test]
    fn failed_loads_leave_the_heap_untouched() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.spawn(&mut heap, Probe::named("B"), stat(9));
        let records = w.serialize(&heap, true).unwrap();

        // Unknown kind.
        let mut target_heap = Heap::default();
        let mut target = World::new(WorldId(2));
        assert!(matches!(
            target.deserialize(&mut target_heap, records.clone()),
            Err(KernelError::UnknownKind(_))
        ));
        assert!(target_heap.is_empty());
        assert!(target.is_empty());

        // Out of bucket order.
        target_heap.kinds_mut().register::<Probe>();
        let mut reversed = records.clone();
        reversed.reverse();
        reversed.iter_mut().for_each(|r| r.fresh = false);
        assert!(matches!(
            target.deserialize(&mut target_heap, reversed),
            Err(KernelError::CorruptTopology(_))
        ));

        // Fresh record in the passive class.
        let mut passive = records.clone();
        passive[0].stat = StatNum::PASSIVE;
        passive.truncate(1);
        assert!(matches!(
            target.deserialize(&mut target_heap, passive),
            Err(KernelError::CorruptTopology(_))
        ));
        assert!(target_heap.is_empty());

        // Ids already present in the heap.
        assert!(matches!(
            w.deserialize(&mut heap, Vec::new()),
            Err(KernelError::WorldNotEmpty(_))
        ));
        let mut other = World::new(WorldId(3));
        assert!(matches!(
            other.deserialize(&mut heap, records),
            Err(KernelError::DuplicateEntity(_))
        ));
    }

    #[test]
    fn arrival_ticks_every_step_of_a_world_with_its_own_clock() {
        let mut heap = Heap::default();
        let mut from = World::new(WorldId(1));
        let mut to = World::new(WorldId(2));
        let log = testing::log();
        let t = from.spawn(&mut heap, Probe::logged("T", &log), stat(5));
        from.run_step(&mut heap).unwrap();
        from.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["T", "T"]);

        from.begin_travel(&mut heap, t).unwrap();
        to.end_travel(&mut heap, t, stat(5)).unwrap();
        for _ in 0..3 {
            to.run_step(&mut heap).unwrap();
        }
        assert_eq!(testing::take(&log), ["T", "T", "T"]);
        assert_eq!(probe(&heap, t).ticks, 5);
    }

    #[test]
    fn travel_moves_a_thinker_between_worlds() {
        let mut heap = Heap::default();
        let mut from = World::new(WorldId(1));
        let mut to = World::new(WorldId(2));
        let log = testing::log();
        let t = from.spawn(&mut heap, Probe::logged("T", &log), stat(5));
        from.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["T"]);

        from.begin_travel(&mut heap, t).unwrap();
        assert!(from.is_empty());
        assert!(heap.get(t).unwrap().is_traveling());
        assert!(!from.change_stat_num(&mut heap, t, 9));
        from.run_step(&mut heap).unwrap();
        assert!(testing::entries(&log).is_empty());

        // Transit keeps it alive without any roots.
        let stats = heap.collect(from.report_roots(&heap));
        assert_eq!(stats.swept, 0);
        assert_eq!(heap.transit().collect::<Vec<_>>(), vec![t]);

        assert!(matches!(
            from.begin_travel(&mut heap, t),
            Err(KernelError::AlreadyTraveling(_))
        ));
        assert_eq!(
            to.end_travel(&mut heap, t, stat(8)).unwrap(),
            BucketId::fresh(stat(8))
        );
        assert_eq!(heap.get(t).unwrap().world(), Some(WorldId(2)));
        assert_eq!(heap.transit().count(), 0);
        assert!(matches!(
            to.end_travel(&mut heap, t, stat(8)),
            Err(KernelError::NotTraveling(_))
        ));
        assert!(matches!(
            from.destroy(&mut heap, t),
            Err(KernelError::WrongWorld { .. })
        ));

        to.run_step(&mut heap).unwrap();
        assert_eq!(testing::take(&log), ["T"]);
        assert_eq!(probe(&heap, t).begun, 1);
    }

    #[test]
    fn destroying_a_traveler_clears_transit() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let t = w.spawn(&mut heap, Probe::named("T"), stat(5));
        w.begin_travel(&mut heap, t).unwrap();
        assert!(w.destroy(&mut heap, t).unwrap());
        assert_eq!(heap.transit().count(), 0);
        heap.collect(std::iter::empty());
        assert!(heap.get(t).is_none());
    }

    #[test]
    fn same_seed_same_random_stream() {
        let mut heap = Heap::default();
        let mut w1 = World::with_seed(WorldId(1), 42);
        let mut w2 = World::with_seed(WorldId(1), 42);
        for _ in 0..10 {
            w1.run_step(&mut heap).unwrap();
            w2.run_step(&mut heap).unwrap();
        }
        assert_eq!(w1.seed(), w2.seed());
        assert_eq!(w1.next_random(), w2.next_random());
        assert_ne!(World::with_seed(WorldId(1), 1).next_random(), w1.next_random());
    }

    #[test]
    fn events_are_recorded() {
        let mut heap = Heap::default();
        let mut w = World::new(WorldId(1));
        let a = w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.run_step(&mut heap).unwrap();
        w.change_stat_num(&mut heap, a, 6);
        w.destroy(&mut heap, a).unwrap();
        let events = w.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[1], WorldEvent::Stepped { tick: 1, ticked: 1, .. }));
        assert!(matches!(events[2], WorldEvent::StatChanged { .. }));
        assert!(w.events().is_empty());
    }

    #[test]
    fn profiling_reports_each_ticked_class() {
        let mut heap = Heap::default();
        let config = SchedulerConfig {
            profile: true,
            ..SchedulerConfig::default()
        };
        let mut w = World::with_config(WorldId(1), 0, config);
        w.spawn(&mut heap, Probe::named("A"), stat(5));
        w.spawn(&mut heap, Probe::named("B"), stat(5));
        w.spawn(&mut heap, Probe::named("C"), stat(40));
        let stats = w.run_step(&mut heap).unwrap();
        assert_eq!(stats.settled, 3);
        let per_class: Vec<(StatNum, usize)> =
            stats.classes.iter().map(|c| (c.stat, c.ticked)).collect();
        assert_eq!(per_class, vec![(stat(5), 2), (stat(40), 1)]);
    }
}
