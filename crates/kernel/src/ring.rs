//! Sentinel-terminated doubly linked rings over an index-stable node store.
//!
//! A ring owns only its sentinel. Member links live in the node store (the
//! heap's entity records), so a node can be unlinked in O(1) from anywhere,
//! including from inside a traversal of the same ring.
//!
//! # Invariants
//! - A ring is empty iff both sentinel links point at the sentinel.
//! - A node carries at most one [`Membership`]; its `bucket` names the only
//!   ring that may unlink it.

use std::fmt;
use tickwork_common::StatNum;

/// Which bucket a ring represents: the stable list of a class or its fresh
/// (pending) counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketId {
    pub stat: StatNum,
    pub fresh: bool,
}

impl BucketId {
    pub fn stable(stat: StatNum) -> Self {
        Self { stat, fresh: false }
    }

    pub fn fresh(stat: StatNum) -> Self {
        Self { stat, fresh: true }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fresh {
            write!(f, "fresh[{}]", self.stat)
        } else {
            write!(f, "thinkers[{}]", self.stat)
        }
    }
}

/// A position in a ring: the sentinel or a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Sentinel,
    Node(u32),
}

/// Ring membership stored alongside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub bucket: BucketId,
    pub next: Link,
    pub prev: Link,
}

/// Storage of per-node membership, indexed by slot.
pub trait RingNodes {
    fn membership(&self, slot: u32) -> Option<&Membership>;
    fn membership_mut(&mut self, slot: u32) -> Option<&mut Option<Membership>>;
}

#[derive(Debug, Clone)]
pub struct Ring {
    id: BucketId,
    next: Link,
    prev: Link,
    len: usize,
}

impl Ring {
    pub fn new(id: BucketId) -> Self {
        Self {
            id,
            next: Link::Sentinel,
            prev: Link::Sentinel,
            len: 0,
        }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.next == Link::Sentinel && self.prev == Link::Sentinel
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The link following the sentinel.
    pub fn first(&self) -> Link {
        self.next
    }

    pub fn head(&self) -> Option<u32> {
        match self.next {
            Link::Node(slot) => Some(slot),
            Link::Sentinel => None,
        }
    }

    pub fn tail(&self) -> Option<u32> {
        match self.prev {
            Link::Node(slot) => Some(slot),
            Link::Sentinel => None,
        }
    }

    /// Successor of `at` in this ring.
    pub fn next_of<N: RingNodes>(&self, nodes: &N, at: Link) -> Link {
        match at {
            Link::Sentinel => self.next,
            Link::Node(slot) => match nodes.membership(slot) {
                Some(m) if m.bucket == self.id => m.next,
                _ => Link::Sentinel,
            },
        }
    }

    /// Whether `slot` is currently a member of this ring.
    pub fn contains<N: RingNodes>(&self, nodes: &N, slot: u32) -> bool {
        nodes.membership(slot).is_some_and(|m| m.bucket == self.id)
    }

    /// Insert `slot` at the tail. The node must not be a member of any ring.
    pub fn append<N: RingNodes>(&mut self, nodes: &mut N, slot: u32) {
        let prev = self.prev;
        let Some(entry) = nodes.membership_mut(slot) else {
            debug_assert!(false, "append of unknown slot {slot}");
            return;
        };
        debug_assert!(
            entry.is_none(),
            "slot {slot} appended to {} while still linked into {:?}",
            self.id,
            entry.as_ref().map(|m| m.bucket)
        );
        *entry = Some(Membership {
            bucket: self.id,
            next: Link::Sentinel,
            prev,
        });
        self.set_next(nodes, prev, Link::Node(slot));
        self.prev = Link::Node(slot);
        self.len += 1;
    }

    /// Remove `slot` from this ring. Returns the link that followed it.
    pub fn unlink<N: RingNodes>(&mut self, nodes: &mut N, slot: u32) -> Link {
        let taken = nodes.membership_mut(slot).and_then(Option::take);
        let Some(m) = taken else {
            debug_assert!(false, "unlink of slot {slot} that is in no ring");
            return Link::Sentinel;
        };
        debug_assert_eq!(
            m.bucket, self.id,
            "slot {slot} unlinked from {} but belongs to {}",
            self.id, m.bucket
        );
        self.set_next(nodes, m.prev, m.next);
        self.set_prev(nodes, m.next, m.prev);
        self.len -= 1;
        m.next
    }

    /// Move every member of `other` onto the tail of this ring, in order.
    /// Returns the moved slots.
    pub fn splice_from<N: RingNodes>(&mut self, other: &mut Ring, nodes: &mut N) -> Vec<u32> {
        let mut moved = Vec::with_capacity(other.len);
        while let Some(slot) = other.head() {
            other.unlink(nodes, slot);
            self.append(nodes, slot);
            moved.push(slot);
        }
        moved
    }

    /// Snapshot of member slots in ring order.
    pub fn slots<N: RingNodes>(&self, nodes: &N) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len);
        let mut at = self.next;
        while let Link::Node(slot) = at {
            out.push(slot);
            at = self.next_of(nodes, at);
        }
        out
    }

    fn set_next<N: RingNodes>(&mut self, nodes: &mut N, at: Link, to: Link) {
        match at {
            Link::Sentinel => self.next = to,
            Link::Node(slot) => {
                if let Some(Some(m)) = nodes.membership_mut(slot) {
                    m.next = to;
                }
            }
        }
    }

    fn set_prev<N: RingNodes>(&mut self, nodes: &mut N, at: Link, to: Link) {
        match at {
            Link::Sentinel => self.prev = to,
            Link::Node(slot) => {
                if let Some(Some(m)) = nodes.membership_mut(slot) {
                    m.prev = to;
                }
            }
        }
    }
}
