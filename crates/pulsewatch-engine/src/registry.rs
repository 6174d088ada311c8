//! Concurrent metric handle registry (component B).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::metric::{MetricDescriptor, MetricEntry, MetricHandle, MetricId};

/// Registry of active metrics, keyed both by id and by name.
///
/// Lookups and inserts go through `DashMap`'s internal sharding so readers
/// never block each other; the `name -> id` allocation path takes a short
/// `parking_lot::Mutex` to make "create if absent" atomic across the two
/// maps.
pub struct MetricRegistry {
    by_id: Arc<DashMap<MetricId, Arc<MetricEntry>>>,
    by_name: Arc<DashMap<String, MetricId>>,
    create_lock: Mutex<()>,
    max_metrics: usize,
}

impl MetricRegistry {
    pub fn new(max_metrics: usize) -> Self {
        MetricRegistry {
            by_id: Arc::new(DashMap::new()),
            by_name: Arc::new(DashMap::new()),
            create_lock: Mutex::new(()),
            max_metrics,
        }
    }

    /// Return the existing handle for `descriptor.name`, or register a new
    /// one. An existing metric with a conflicting descriptor is an error —
    /// callers must release and re-register rather than silently mutate an
    /// entry other handles may depend on.
    pub fn get_or_create(&self, descriptor: MetricDescriptor) -> Result<MetricHandle> {
        let _guard = self.create_lock.lock();

        if let Some(id) = self.by_name.get(&descriptor.name).map(|e| *e) {
            // A concurrent release can have cleared by_id for `id` between
            // the by_name lookup above and here; fall through to creation
            // in that case rather than treating it as a bug.
            if let Some(entry) = self.by_id.get(&id).map(|e| e.clone()) {
                if entry.descriptor != descriptor {
                    return Err(EngineError::DescriptorMismatch(descriptor.name));
                }

                entry.refcount.fetch_add(1, Ordering::AcqRel);
                return Ok(self.handle_for(entry));
            }
            self.by_name.remove(&descriptor.name);
        }

        if self.by_id.len() >= self.max_metrics && self.max_metrics != 0 {
            return Err(EngineError::RegistryFull(self.max_metrics));
        }

        if descriptor.capacity == 0 {
            return Err(EngineError::ZeroCapacity);
        }
        if descriptor.update_every_s == 0 {
            return Err(EngineError::InvalidUpdateEvery);
        }

        let id = MetricId::next();
        let entry = Arc::new(MetricEntry::new(id, descriptor.clone()));
        self.by_id.insert(id, entry.clone());
        self.by_name.insert(descriptor.name, id);

        debug!(%id, "registered metric");
        Ok(self.handle_for(entry))
    }

    pub fn get_by_id(&self, id: MetricId) -> Result<MetricHandle> {
        let entry = self.by_id.get(&id).ok_or(EngineError::UnknownMetric(id))?.clone();
        entry.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(self.handle_for(entry))
    }

    pub fn get_by_name(&self, name: &str) -> Option<MetricHandle> {
        let id = *self.by_name.get(name)?;
        self.get_by_id(id).ok()
    }

    /// Cheap retention probe: `(first_seen_s, last_seen_s)` for `id` without
    /// touching the ring or changing the refcount.
    pub fn retention(&self, id: MetricId) -> Option<(i64, i64)> {
        self.by_id.get(&id)?.retention()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Drop every metric whose refcount is zero. Handles normally trigger
    /// this via `release_internal` as soon as the last clone drops; this
    /// sweep exists for entries created and released before any retention
    /// pass runs, and as a defensive catch-all if the release callback were
    /// ever missed.
    pub fn sweep_unreferenced(&self) -> usize {
        let mut removed = 0;
        self.by_id.retain(|_, entry| {
            let alive = entry.refcount.load(Ordering::Acquire) > 0;
            if !alive {
                self.by_name.remove(&entry.descriptor.name);
                removed += 1;
            }
            alive
        });
        removed
    }

    fn handle_for(&self, entry: Arc<MetricEntry>) -> MetricHandle {
        let by_id = self.by_id.clone();
        let by_name = self.by_name.clone();
        MetricHandle {
            entry,
            release: Arc::new(move |id| {
                let name = by_id.get(&id).and_then(|e| {
                    (e.refcount.load(Ordering::Acquire) == 0).then(|| e.descriptor.name.clone())
                });
                if let Some(name) = name {
                    by_id.remove(&id);
                    by_name.remove(&name);
                }
            }),
        }
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        MetricRegistry::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricDescriptor;

    fn descriptor(name: &str) -> MetricDescriptor {
        MetricDescriptor::new(name, "percentage", 1, 60)
    }

    #[test]
    fn create_then_lookup_by_name() {
        let registry = MetricRegistry::new(0);
        let handle = registry.get_or_create(descriptor("cpu.usage")).unwrap();
        let id = handle.id();

        let found = registry.get_by_name("cpu.usage").unwrap();
        assert_eq!(found.id(), id);
    }

    #[test]
    fn repeated_create_reuses_entry() {
        let registry = MetricRegistry::new(0);
        let a = registry.get_or_create(descriptor("mem.used")).unwrap();
        let b = registry.get_or_create(descriptor("mem.used")).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_descriptor_is_rejected() {
        let registry = MetricRegistry::new(0);
        registry.get_or_create(descriptor("disk.io")).unwrap();
        let conflict = MetricDescriptor::new("disk.io", "bytes", 1, 60);
        assert!(registry.get_or_create(conflict).is_err());
    }

    #[test]
    fn release_drops_entry_once_unreferenced() {
        let registry = MetricRegistry::new(0);
        let handle = registry.get_or_create(descriptor("net.rx")).unwrap();
        assert_eq!(registry.len(), 1);
        drop(handle);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn cloned_handles_keep_entry_alive() {
        let registry = MetricRegistry::new(0);
        let a = registry.get_or_create(descriptor("net.tx")).unwrap();
        let b = a.clone();
        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn retention_is_none_before_first_sample() {
        let registry = MetricRegistry::new(0);
        let handle = registry.get_or_create(descriptor("disk.free")).unwrap();
        assert_eq!(registry.retention(handle.id()), None);
    }

    #[test]
    fn retention_reports_first_and_last_seen() {
        use crate::sample::SampleFlags;
        let registry = MetricRegistry::new(0);
        let handle = registry.get_or_create(descriptor("disk.used")).unwrap();
        handle.store_sample(1000, 1.0, SampleFlags::NONE);
        handle.store_sample(1005, 2.0, SampleFlags::NONE);
        assert_eq!(registry.retention(handle.id()), Some((1000, 1005)));
    }

    #[test]
    fn registry_full_rejects_new_metrics() {
        let registry = MetricRegistry::new(1);
        registry.get_or_create(descriptor("a")).unwrap();
        assert!(registry.get_or_create(descriptor("b")).is_err());
    }
}
