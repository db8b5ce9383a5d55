//! Per-world bucket arrays: stable thinkers by class plus fresh (pending) lists.
//!
//! # Invariants
//! - `thinkers` has one ring per class including the passive one; `fresh`
//!   has one per ticking class only.
//! - A record's membership bucket always matches its `stat`.
//! - Every traversal that may run hooks registers a guard. Unlinking the
//!   node a guard points at moves the guard to that node's successor, so a
//!   captured "next" is never left dangling.

use crate::heap::{Handle, Heap};
use crate::ring::{BucketId, Link, Ring, RingNodes};
use tickwork_common::StatNum;

#[derive(Debug, Clone, Copy)]
struct Guard {
    bucket: BucketId,
    next: Link,
}

/// Token for an active traversal guard.
#[derive(Debug)]
#[must_use]
pub(crate) struct GuardId(usize);

#[derive(Debug)]
pub struct ThinkerCollection {
    thinkers: Vec<Ring>,
    fresh: Vec<Ring>,
    guards: Vec<Guard>,
}

impl Default for ThinkerCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkerCollection {
    pub fn new() -> Self {
        Self {
            thinkers: StatNum::all().map(|s| Ring::new(BucketId::stable(s))).collect(),
            fresh: StatNum::ticking_classes()
                .map(|s| Ring::new(BucketId::fresh(s)))
                .collect(),
            guards: Vec::new(),
        }
    }

    pub fn ring(&self, bucket: BucketId) -> &Ring {
        if bucket.fresh {
            &self.fresh[bucket.stat.index()]
        } else {
            &self.thinkers[bucket.stat.index()]
        }
    }

    fn ring_mut(&mut self, bucket: BucketId) -> &mut Ring {
        if bucket.fresh {
            &mut self.fresh[bucket.stat.index()]
        } else {
            &mut self.thinkers[bucket.stat.index()]
        }
    }

    /// Whether a bucket exists. The passive class has no fresh list.
    pub fn has_bucket(bucket: BucketId) -> bool {
        !(bucket.fresh && bucket.stat.is_passive())
    }

    /// Buckets in serialization order: stable by ascending class (passive
    /// last), then fresh by ascending class.
    pub fn buckets() -> impl Iterator<Item = BucketId> {
        StatNum::all()
            .map(BucketId::stable)
            .chain(StatNum::ticking_classes().map(BucketId::fresh))
    }

    pub fn is_empty(&self) -> bool {
        self.thinkers.iter().chain(&self.fresh).all(Ring::is_empty)
    }

    pub fn len(&self) -> usize {
        self.thinkers.iter().chain(&self.fresh).map(Ring::len).sum()
    }

    /// Append to a specific bucket.
    pub(crate) fn place(&mut self, heap: &mut Heap, slot: u32, bucket: BucketId) {
        debug_assert!(Self::has_bucket(bucket));
        self.ring_mut(bucket).append(heap, slot);
    }

    /// Route a newly created record: fresh list of its class, or straight to
    /// the stable passive list.
    pub(crate) fn link(&mut self, heap: &mut Heap, slot: u32, stat: StatNum) -> BucketId {
        let bucket = if stat.is_passive() {
            BucketId::stable(stat)
        } else {
            BucketId::fresh(stat)
        };
        self.place(heap, slot, bucket);
        bucket
    }

    /// Remove a record from whichever bucket holds it, fixing up guards.
    pub(crate) fn unlink(&mut self, heap: &mut Heap, slot: u32) -> Option<BucketId> {
        let bucket = heap.membership(slot)?.bucket;
        let next = self.ring_mut(bucket).unlink(heap, slot);
        for guard in self.guards.iter_mut() {
            if guard.bucket == bucket && guard.next == Link::Node(slot) {
                guard.next = next;
            }
        }
        Some(bucket)
    }

    /// Move every fresh record of a class onto the tail of its stable list.
    /// Returns the moved slots in order.
    pub(crate) fn fold_fresh(&mut self, heap: &mut Heap, stat: StatNum) -> Vec<u32> {
        if stat.is_passive() {
            return Vec::new();
        }
        let index = stat.index();
        self.thinkers[index].splice_from(&mut self.fresh[index], heap)
    }

    /// First stable member of a class.
    pub fn first_thinker(&self, heap: &Heap, stat: StatNum) -> Option<Handle> {
        let slot = self.thinkers[stat.index()].head()?;
        heap.handle_at(slot)
    }

    pub(crate) fn next_link(&self, heap: &Heap, bucket: BucketId, at: Link) -> Link {
        self.ring(bucket).next_of(heap, at)
    }

    /// Members of a bucket in ring order.
    pub fn handles(&self, heap: &Heap, bucket: BucketId) -> Vec<Handle> {
        self.ring(bucket)
            .slots(heap)
            .into_iter()
            .filter_map(|slot| heap.handle_at(slot))
            .collect()
    }

    /// Every member, in serialization order.
    pub fn all_handles(&self, heap: &Heap) -> Vec<Handle> {
        Self::buckets()
            .flat_map(|bucket| self.handles(heap, bucket))
            .collect()
    }

    pub(crate) fn push_guard(&mut self, bucket: BucketId) -> GuardId {
        self.guards.push(Guard {
            bucket,
            next: Link::Sentinel,
        });
        GuardId(self.guards.len() - 1)
    }

    pub(crate) fn set_guard(&mut self, guard: &GuardId, next: Link) {
        self.guards[guard.0].next = next;
    }

    pub(crate) fn guard(&self, guard: &GuardId) -> Link {
        self.guards[guard.0].next
    }

    pub(crate) fn pop_guard(&mut self, guard: GuardId) {
        debug_assert_eq!(guard.0 + 1, self.guards.len(), "guards released out of order");
        self.guards.truncate(guard.0);
    }

    /// Count of members per bucket, skipping empty ones.
    pub fn occupancy(&self) -> Vec<(BucketId, usize)> {
        Self::buckets()
            .map(|b| (b, self.ring(b).len()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}
