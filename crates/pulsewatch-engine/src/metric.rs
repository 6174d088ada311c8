//! Metric identity and descriptor types (component B).

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ring::Ring;

static NEXT_METRIC_ID: AtomicU64 = AtomicU64::new(1);

/// Sentinel for "no sample stored yet", mirroring `ring::NO_TIMESTAMP`.
const NO_TIMESTAMP: i64 = i64::MIN;

/// Opaque, process-unique identifier for a registered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub(crate) u64);

impl MetricId {
    pub(crate) fn next() -> Self {
        MetricId(NEXT_METRIC_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metric#{}", self.0)
    }
}

/// Caller-supplied identity of a metric. Two descriptors with the same
/// `name` but different `update_every_s`/`capacity` are a registration
/// conflict, not an implicit update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub unit: String,
    pub update_every_s: u32,
    pub capacity: usize,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, update_every_s: u32, capacity: usize) -> Self {
        MetricDescriptor {
            name: name.into(),
            unit: unit.into(),
            update_every_s,
            capacity,
        }
    }
}

/// Registry-internal state for one metric: its descriptor, storage ring, and
/// a refcount of live [`MetricHandle`]s. Removal from the registry happens
/// only when the refcount drops to zero, which the registry arbitrates with
/// a compare-exchange loop to stay race-free against concurrent lookups.
pub(crate) struct MetricEntry {
    pub id: MetricId,
    pub descriptor: MetricDescriptor,
    pub ring: Ring,
    pub refcount: AtomicUsize,
    first_seen_s: AtomicI64,
}

impl MetricEntry {
    pub(crate) fn new(id: MetricId, descriptor: MetricDescriptor) -> Self {
        let ring = Ring::new(descriptor.capacity, descriptor.update_every_s);
        MetricEntry {
            id,
            descriptor,
            ring,
            refcount: AtomicUsize::new(1),
            first_seen_s: AtomicI64::new(NO_TIMESTAMP),
        }
    }

    /// Record the timestamp of the first sample ever accepted by this
    /// handle's ring. A no-op after the first successful call.
    pub(crate) fn note_first_seen(&self, timestamp: i64) {
        self.first_seen_s
            .compare_exchange(NO_TIMESTAMP, timestamp, Ordering::AcqRel, Ordering::Acquire)
            .ok();
    }

    /// `(first_seen_s, last_seen_s)`, or `None` if no sample has landed yet.
    pub(crate) fn retention(&self) -> Option<(i64, i64)> {
        let first = self.first_seen_s.load(Ordering::Acquire);
        if first == NO_TIMESTAMP {
            return None;
        }
        let last = self.ring.last_timestamp()?;
        Some((first, last))
    }
}

/// A live reference to a registered metric. Dropping the last handle for a
/// metric allows the registry to evict its storage on the next retention
/// pass; it does not itself delete data.
pub struct MetricHandle {
    pub(crate) entry: Arc<MetricEntry>,
    pub(crate) release: Arc<dyn Fn(MetricId) + Send + Sync>,
}

impl MetricHandle {
    pub fn id(&self) -> MetricId {
        self.entry.id
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.entry.descriptor
    }
}

impl Clone for MetricHandle {
    fn clone(&self) -> Self {
        self.entry.refcount.fetch_add(1, Ordering::AcqRel);
        MetricHandle {
            entry: Arc::clone(&self.entry),
            release: Arc::clone(&self.release),
        }
    }
}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricHandle")
            .field("id", &self.entry.id)
            .field("name", &self.entry.descriptor.name)
            .finish()
    }
}

impl Drop for MetricHandle {
    fn drop(&mut self) {
        // Only the owning Arc that the registry keeps plus outstanding
        // handles count toward the refcount; dropping a clone here should
        // release exactly once.
        if self.entry.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            (self.release)(self.entry.id);
        }
    }
}
