use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tickwork_common::{EntityId, StatNum, WorldId};
use tickwork_kernel::{BucketId, Heap, World};

/// Scheduler inspector for developer tooling.
///
/// Read-only queries against a world and the heap it schedules from.
pub struct WorldInspector;

impl WorldInspector {
    pub fn summary(world: &World, heap: &Heap) -> WorldSummary {
        let mut summary = WorldSummary {
            world: world.id(),
            tick: world.tick(),
            seed: world.seed(),
            stable: 0,
            fresh: 0,
            passive: 0,
            traveling: heap.transit().count(),
            heap_records: heap.len(),
            pending_events: world.events().len(),
        };
        for (bucket, len) in world.thinkers().occupancy() {
            if bucket.fresh {
                summary.fresh += len;
            } else if bucket.stat.is_passive() {
                summary.passive += len;
            } else {
                summary.stable += len;
            }
        }
        summary
    }

    /// Non-empty buckets in serialization order.
    pub fn buckets(world: &World) -> Vec<BucketInfo> {
        world
            .thinkers()
            .occupancy()
            .into_iter()
            .map(|(bucket, len)| BucketInfo { bucket, len })
            .collect()
    }

    pub fn inspect_entity(heap: &Heap, id: EntityId) -> Option<EntityInfo> {
        let record = heap.get(heap.find(id)?)?;
        Some(EntityInfo {
            id,
            kind: record.kind(),
            world: record.world(),
            stat: record.stat(),
            bucket: record.membership().map(|m| m.bucket),
            traveling: record.is_traveling(),
            pending_destroy: record.is_pending_destroy(),
            began_play: record.has_begun_play(),
        })
    }

    /// Members of one class, stable list first, in tick order.
    pub fn list_class(world: &World, heap: &Heap, stat: StatNum) -> Vec<EntityInfo> {
        let mut buckets = vec![BucketId::stable(stat)];
        if !stat.is_passive() {
            buckets.push(BucketId::fresh(stat));
        }
        buckets
            .into_iter()
            .flat_map(|bucket| world.thinkers().handles(heap, bucket))
            .filter_map(|h| heap.get(h))
            .filter_map(|record| Self::inspect_entity(heap, record.id()))
            .collect()
    }

    /// Linked thinkers per kind name.
    pub fn census(world: &World, heap: &Heap) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for handle in world.report_roots(heap) {
            if let Some(record) = heap.get(handle) {
                *counts.entry(record.kind()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Summary of one world for the inspector.
#[derive(Debug, Clone, Serialize)]
pub struct WorldSummary {
    pub world: WorldId,
    pub tick: u64,
    pub seed: u64,
    /// Members of ticking stable lists.
    pub stable: usize,
    pub fresh: usize,
    pub passive: usize,
    /// Heap-wide, not just this world.
    pub traveling: usize,
    pub heap_records: usize,
    pub pending_events: usize,
}

impl fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: tick={} seed={} stable={} fresh={} passive={} traveling={} heap={} pending_events={}",
            self.world,
            self.tick,
            self.seed,
            self.stable,
            self.fresh,
            self.passive,
            self.traveling,
            self.heap_records,
            self.pending_events
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketInfo {
    #[serde(serialize_with = "bucket_name")]
    pub bucket: BucketId,
    pub len: usize,
}

impl fmt::Display for BucketInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<14} {:>6}", self.bucket.to_string(), self.len)
    }
}

fn bucket_name<S: serde::Serializer>(bucket: &BucketId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(bucket)
}

/// Scheduling state of a single entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub kind: &'static str,
    pub world: Option<WorldId>,
    pub stat: StatNum,
    #[serde(serialize_with = "maybe_bucket_name")]
    pub bucket: Option<BucketId>,
    pub traveling: bool,
    pub pending_destroy: bool,
    pub began_play: bool,
}

fn maybe_bucket_name<S: serde::Serializer>(bucket: &Option<BucketId>, s: S) -> Result<S::Ok, S::Error> {
    match bucket {
        Some(bucket) => s.collect_str(bucket),
        None => s.serialize_none(),
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity [{}] {} stat={}", self.id, self.kind, self.stat)?;
        match (self.bucket, self.traveling) {
            (Some(bucket), _) => write!(f, " in {bucket}")?,
            (None, true) => f.write_str(" traveling")?,
            (None, false) => f.write_str(" unlinked")?,
        }
        if self.pending_destroy {
            f.write_str(" (destroyed)")?;
        }
        Ok(())
    }
}
