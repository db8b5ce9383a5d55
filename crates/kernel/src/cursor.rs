//! Resumable scans over a world's buckets, filtered by kind.
//!
//! A cursor holds no borrow between calls. It remembers the last entity it
//! returned and that entity's successor at the time, and picks up from
//! whichever of the two is still in the bucket being scanned. When both have
//! left, the bucket is walked again from its head, skipping every entity the
//! scan has already returned from it.

use crate::collection::ThinkerCollection;
use crate::heap::{Handle, Heap};
use crate::kind::Kind;
use crate::ring::{BucketId, Link};
use crate::world::World;
use std::collections::HashSet;
use std::marker::PhantomData;
use tickwork_common::{StatNum, WorldId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Start,
    After {
        last: Handle,
        successor: Option<Handle>,
    },
    Done,
}

/// Scan over one class (stable then fresh) or, without a class, over every
/// class in ascending order with the passive list last.
#[derive(Debug, Clone)]
pub struct ThinkerIterator {
    world: WorldId,
    filter: Option<&'static str>,
    stat: Option<StatNum>,
    bucket: BucketId,
    position: Position,
    /// Entities already returned from `bucket`.
    visited: HashSet<Handle>,
}

impl ThinkerIterator {
    /// `filter` is a kind name; `None` matches every kind.
    pub fn new(world: &World, filter: Option<&'static str>, stat: Option<StatNum>) -> Self {
        Self {
            world: world.id(),
            filter,
            stat,
            bucket: Self::first_bucket(stat),
            position: Position::Start,
            visited: HashSet::new(),
        }
    }

    /// Start just after `prev`, for spreading work over several steps. Falls
    /// back to a full restart when `prev` is not in scope or is the last
    /// member of its bucket.
    pub fn after(
        world: &World,
        heap: &Heap,
        filter: Option<&'static str>,
        stat: Option<StatNum>,
        prev: Handle,
    ) -> Self {
        let mut cursor = Self::new(world, filter, stat);
        let Some(membership) = heap.get(prev).and_then(|r| r.membership) else {
            return cursor;
        };
        let in_scope = stat.is_none_or(|s| s == membership.bucket.stat);
        if !in_scope {
            return cursor;
        }
        if let Link::Node(next) = membership.next {
            let members = world.thinkers().handles(heap, membership.bucket);
            let upto = members.iter().position(|&h| h == prev).map_or(0, |i| i + 1);
            cursor.visited.extend(&members[..upto]);
            cursor.bucket = membership.bucket;
            cursor.position = Position::After {
                last: prev,
                successor: heap.handle_at(next),
            };
        }
        cursor
    }

    pub fn reinit(&mut self) {
        self.bucket = Self::first_bucket(self.stat);
        self.position = Position::Start;
        self.visited.clear();
    }

    /// Next live match. With `exact`, only the filter kind itself matches;
    /// otherwise its descendants do too.
    pub fn next(&mut self, heap: &Heap, world: &World, exact: bool) -> Option<Handle> {
        debug_assert_eq!(world.id(), self.world, "cursor used with another world");
        let thinkers = world.thinkers();
        loop {
            let mut at = match self.position {
                Position::Done => return None,
                Position::Start => thinkers.ring(self.bucket).first(),
                Position::After { last, successor } => self.resume(heap, thinkers, last, successor),
            };
            while let Link::Node(slot) = at {
                let next = thinkers.next_link(heap, self.bucket, at);
                if let Some(handle) = heap.handle_at(slot) {
                    if !self.visited.contains(&handle) && self.matches(heap, handle, exact) {
                        self.visited.insert(handle);
                        self.position = Position::After {
                            last: handle,
                            successor: match next {
                                Link::Node(n) => heap.handle_at(n),
                                Link::Sentinel => None,
                            },
                        };
                        return Some(handle);
                    }
                }
                at = next;
            }
            match self.following(self.bucket) {
                Some(bucket) => {
                    self.bucket = bucket;
                    self.position = Position::Start;
                    self.visited.clear();
                }
                None => {
                    self.position = Position::Done;
                    return None;
                }
            }
        }
    }

    fn resume(
        &self,
        heap: &Heap,
        thinkers: &ThinkerCollection,
        last: Handle,
        successor: Option<Handle>,
    ) -> Link {
        if self.in_bucket(heap, last) {
            return thinkers.next_link(heap, self.bucket, Link::Node(last.index()));
        }
        match successor {
            Some(next) if self.in_bucket(heap, next) => Link::Node(next.index()),
            _ => thinkers.ring(self.bucket).first(),
        }
    }

    fn in_bucket(&self, heap: &Heap, handle: Handle) -> bool {
        heap.get(handle)
            .and_then(|r| r.membership)
            .is_some_and(|m| m.bucket == self.bucket)
    }

    fn matches(&self, heap: &Heap, handle: Handle, exact: bool) -> bool {
        let Some(record) = heap.get(handle) else {
            return false;
        };
        if record.pending_destroy {
            return false;
        }
        match self.filter {
            None => true,
            Some(target) => heap.kinds().is_a(record.kind, target, exact),
        }
    }

    fn first_bucket(stat: Option<StatNum>) -> BucketId {
        BucketId::stable(stat.unwrap_or(StatNum::FIRST))
    }

    fn following(&self, bucket: BucketId) -> Option<BucketId> {
        if !bucket.fresh {
            return (!bucket.stat.is_passive()).then(|| BucketId::fresh(bucket.stat));
        }
        if self.stat.is_some() {
            return None;
        }
        StatNum::new(i64::from(bucket.stat) + 1).ok().map(BucketId::stable)
    }
}

/// A cursor that also hands out the concrete thinker.
#[derive(Debug, Clone)]
pub struct TypedIterator<T: Kind> {
    inner: ThinkerIterator,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Kind> TypedIterator<T> {
    pub fn new(world: &World, stat: Option<StatNum>) -> Self {
        Self {
            inner: ThinkerIterator::new(world, Some(T::NAME), stat),
            _kind: PhantomData,
        }
    }

    pub fn after(world: &World, heap: &Heap, stat: Option<StatNum>, prev: Handle) -> Self {
        Self {
            inner: ThinkerIterator::after(world, heap, Some(T::NAME), stat, prev),
            _kind: PhantomData,
        }
    }

    pub fn reinit(&mut self) {
        self.inner.reinit();
    }

    /// Next handle of `T` or, unless `exact`, of a kind descending from it.
    pub fn next(&mut self, heap: &Heap, world: &World, exact: bool) -> Option<Handle> {
        self.inner.next(heap, world, exact)
    }

    /// Next exact `T`, borrowed from the heap. Thinkers busy in a hook are
    /// skipped.
    pub fn next_thinker<'h>(&mut self, heap: &'h Heap, world: &World) -> Option<(Handle, &'h T)> {
        loop {
            let handle = self.inner.next(heap, world, true)?;
            if let Some(thinker) = heap.thinker::<T>(handle) {
                return Some((handle, thinker));
            }
        }
    }
}
