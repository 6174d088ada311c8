//! Fixed-capacity, single-writer/multi-reader ring buffer over packed
//! samples (component C).
//!
//! Slots are addressed by a monotonically increasing cursor; the physical
//! index is `cursor % capacity`. Readers only ever see `cursor % capacity`
//! positions that have actually been written, which [`crate::query`]
//! enforces by clamping against `oldest_cursor()`/`write_cursor()`.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use tracing::warn;

use crate::sample::{self, Sample, SampleFlags};

/// Sentinel for "no sample written yet".
const NO_TIMESTAMP: i64 = i64::MIN;

pub struct Ring {
    capacity: usize,
    update_every_s: AtomicU32,
    slots: Box<[AtomicU32]>,
    write_cursor: AtomicU64,
    last_timestamp: AtomicI64,
}

impl Ring {
    pub fn new(capacity: usize, update_every_s: u32) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| AtomicU32::new(sample::EMPTY.raw()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ring {
            capacity: capacity.max(1),
            update_every_s: AtomicU32::new(update_every_s.max(1)),
            slots,
            write_cursor: AtomicU64::new(0),
            last_timestamp: AtomicI64::new(NO_TIMESTAMP),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn update_every_s(&self) -> u32 {
        self.update_every_s.load(Ordering::Relaxed)
    }

    /// Change the collection interval going forward. Existing slots keep
    /// their timestamps implicit in their position; gap-fill math after this
    /// call uses the new interval.
    pub fn set_update_every(&self, new_update_every_s: u32) {
        self.update_every_s.store(new_update_every_s.max(1), Ordering::Relaxed);
    }

    pub fn write_cursor(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Oldest cursor value still present in the ring (0 until it has wrapped).
    pub fn oldest_cursor(&self) -> u64 {
        let written = self.write_cursor();
        written.saturating_sub(self.capacity as u64)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        let ts = self.last_timestamp.load(Ordering::Acquire);
        (ts != NO_TIMESTAMP).then_some(ts)
    }

    fn slot_index(&self, cursor: u64) -> usize {
        (cursor % self.capacity as u64) as usize
    }

    /// Read the raw sample at a given cursor. Caller is responsible for
    /// checking the cursor is within `[oldest_cursor(), write_cursor())`.
    pub(crate) fn read_at(&self, cursor: u64) -> Sample {
        let idx = self.slot_index(cursor);
        Sample::from_raw(self.slots[idx].load(Ordering::Acquire))
    }

    fn write_raw(&self, cursor: u64, sample: Sample) {
        let idx = self.slot_index(cursor);
        self.slots[idx].store(sample.raw(), Ordering::Release);
    }

    /// Store one collected value at `timestamp` (unix seconds), filling any
    /// gap since the last write with `EMPTY` slots. Out-of-order timestamps
    /// (`timestamp <= last_timestamp`) are dropped; a gap spanning the whole
    /// ring degenerates to a full flush before the new value is written.
    pub fn store_sample(&self, timestamp: i64, value: f64, flags: SampleFlags) {
        let update_every = self.update_every_s() as i64;
        let sample = sample::pack(value, flags);

        let Some(last) = self.last_timestamp() else {
            let cursor = self.write_cursor.fetch_add(1, Ordering::AcqRel);
            self.write_raw(cursor, sample);
            self.last_timestamp.store(timestamp, Ordering::Release);
            return;
        };

        if timestamp <= last {
            warn!(timestamp, last, "dropping out-of-order sample");
            return;
        }

        let gap = (timestamp - last) / update_every - 1;
        if gap >= self.capacity as i64 {
            self.fill_empty_to(timestamp - update_every);
        } else if gap > 0 {
            self.fill_gap(gap as u64);
        }

        let cursor = self.write_cursor.fetch_add(1, Ordering::AcqRel);
        self.write_raw(cursor, sample);
        self.last_timestamp.store(timestamp, Ordering::Release);
    }

    fn fill_gap(&self, count: u64) {
        for _ in 0..count {
            let cursor = self.write_cursor.fetch_add(1, Ordering::AcqRel);
            self.write_raw(cursor, sample::EMPTY);
        }
        let update_every = self.update_every_s() as i64;
        let last = self.last_timestamp.load(Ordering::Acquire);
        self.last_timestamp
            .store(last + update_every * count as i64, Ordering::Release);
    }

    /// Mark every slot as `EMPTY` as if the whole ring had gone stale, and
    /// advance the last-write bookmark to `up_to`. Used both for a gap that
    /// exceeds the ring's span and for an explicit idle flush.
    pub fn flush(&self, up_to: i64) {
        self.fill_empty_to(up_to);
    }

    fn fill_empty_to(&self, up_to: i64) {
        for _ in 0..self.capacity {
            let cursor = self.write_cursor.fetch_add(1, Ordering::AcqRel);
            self.write_raw(cursor, sample::EMPTY);
        }
        self.last_timestamp.store(up_to, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_writes_stay_in_order() {
        let ring = Ring::new(4, 1);
        ring.store_sample(100, 1.0, SampleFlags::NONE);
        ring.store_sample(101, 2.0, SampleFlags::NONE);
        ring.store_sample(102, 3.0, SampleFlags::NONE);

        assert_eq!(ring.write_cursor(), 3);
        let (v, _) = sample::unpack(ring.read_at(0));
        assert_eq!(v, 1.0);
        let (v, _) = sample::unpack(ring.read_at(2));
        assert_eq!(v, 3.0);
    }

    #[test]
    fn gap_fills_with_empty() {
        let ring = Ring::new(8, 1);
        ring.store_sample(100, 1.0, SampleFlags::NONE);
        ring.store_sample(103, 2.0, SampleFlags::NONE);

        assert_eq!(ring.write_cursor(), 4);
        assert!(sample::is_empty(ring.read_at(1)));
        assert!(sample::is_empty(ring.read_at(2)));
        let (v, _) = sample::unpack(ring.read_at(3));
        assert_eq!(v, 2.0);
    }

    #[test]
    fn huge_gap_degenerates_to_flush() {
        let ring = Ring::new(4, 1);
        ring.store_sample(100, 1.0, SampleFlags::NONE);
        ring.store_sample(1000, 2.0, SampleFlags::NONE);

        // entire ring flushed plus the new sample
        assert_eq!(ring.write_cursor(), 4 + 1);
        let (v, _) = sample::unpack(ring.read_at(4));
        assert_eq!(v, 2.0);
    }

    #[test]
    fn out_of_order_is_dropped() {
        let ring = Ring::new(4, 1);
        ring.store_sample(100, 1.0, SampleFlags::NONE);
        ring.store_sample(99, 2.0, SampleFlags::NONE);
        assert_eq!(ring.write_cursor(), 1);
    }

    #[test]
    fn wraps_around_capacity() {
        let ring = Ring::new(2, 1);
        ring.store_sample(100, 1.0, SampleFlags::NONE);
        ring.store_sample(101, 2.0, SampleFlags::NONE);
        ring.store_sample(102, 3.0, SampleFlags::NONE);

        assert_eq!(ring.oldest_cursor(), 1);
        let (v, _) = sample::unpack(ring.read_at(2));
        assert_eq!(v, 3.0);
    }
}
