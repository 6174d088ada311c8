//! Time-aligned query iterator (component D).

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::metric::MetricEntry;
use crate::sample::{self, SampleFlags};

/// One resolved point in a query window, spanning `[start, end)` at the
/// ring's collection interval. `value` is `None` for a step that fell
/// outside the ring's live span or landed on a slot that was never
/// collected (the packed `EMPTY` sentinel); `count`/`anomaly_count` are
/// both `0` in that case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub start: i64,
    pub end: i64,
    pub value: Option<f64>,
    pub flags: SampleFlags,
    pub anomaly_count: u32,
    pub count: u32,
}

/// Walks `[start, end]` (unix seconds, inclusive) at the ring's
/// `update_every_s` spacing, oldest first. Every step in the requested
/// range yields a point: steps outside the ring's live span (or landing on
/// an uncollected slot) come back empty rather than being dropped, so the
/// emitted sequence is always evenly spaced with no gaps.
pub struct QueryCursor {
    entry: Arc<MetricEntry>,
    next_timestamp: i64,
    end: i64,
    dt: i64,
    last_cursor: u64,
    oldest_ts: i64,
    last_ts: i64,
    has_data: bool,
}

impl QueryCursor {
    pub fn new(entry: Arc<MetricEntry>, start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidWindow { start, end });
        }

        let ring = &entry.ring;
        let dt = ring.update_every_s() as i64;

        let Some(last_ts) = ring.last_timestamp() else {
            return Ok(QueryCursor {
                entry,
                next_timestamp: start,
                end,
                dt,
                last_cursor: 0,
                oldest_ts: 0,
                last_ts: 0,
                has_data: false,
            });
        };

        let write_cursor = ring.write_cursor();
        let last_cursor = write_cursor - 1;
        let oldest_cursor = ring.oldest_cursor();
        let oldest_ts = last_ts - (last_cursor - oldest_cursor) as i64 * dt;

        Ok(QueryCursor {
            entry,
            next_timestamp: start,
            end,
            dt,
            last_cursor,
            oldest_ts,
            last_ts,
            has_data: true,
        })
    }
}

impl Iterator for QueryCursor {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.next_timestamp > self.end {
            return None;
        }

        let this_ts = self.next_timestamp;
        self.next_timestamp += self.dt;

        if !self.has_data || this_ts < self.oldest_ts || this_ts > self.last_ts {
            return Some(Point {
                start: this_ts - self.dt,
                end: this_ts,
                value: None,
                flags: SampleFlags::NONE,
                anomaly_count: 0,
                count: 0,
            });
        }

        let offset = (self.last_ts - this_ts) / self.dt;
        let cursor = self.last_cursor.saturating_sub(offset as u64);
        let raw = self.entry.ring.read_at(cursor);
        let (value, flags) = sample::unpack(raw);
        let is_empty = sample::is_empty(raw);

        Some(Point {
            start: this_ts - self.dt,
            end: this_ts,
            value: (!is_empty).then_some(value),
            flags,
            anomaly_count: u32::from(flags.anomalous),
            count: if is_empty { 0 } else { 1 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricDescriptor, MetricEntry};
    use crate::sample::SampleFlags;

    fn entry_with(capacity: usize, update_every: u32) -> Arc<MetricEntry> {
        let descriptor = MetricDescriptor::new("cpu.usage", "percentage", update_every, capacity);
        Arc::new(MetricEntry::new(crate::metric::MetricId::next(), descriptor))
    }

    #[test]
    fn yields_points_in_window() {
        let entry = entry_with(8, 1);
        entry.ring.store_sample(100, 1.0, SampleFlags::NONE);
        entry.ring.store_sample(101, 2.0, SampleFlags::NONE);
        entry.ring.store_sample(102, 3.0, SampleFlags::NONE);

        let points: Vec<_> = QueryCursor::new(entry, 100, 101).unwrap().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].end, 100);
        assert_eq!(points[0].value, Some(1.0));
        assert_eq!(points[1].end, 101);
    }

    #[test]
    fn reports_empty_slots_as_none() {
        let entry = entry_with(8, 1);
        entry.ring.store_sample(100, 1.0, SampleFlags::NONE);
        entry.ring.store_sample(103, 2.0, SampleFlags::NONE);

        let points: Vec<_> = QueryCursor::new(entry, 100, 103).unwrap().collect();
        assert_eq!(points.len(), 4);
        assert_eq!(points[1].value, None);
        assert_eq!(points[2].value, None);
    }

    #[test]
    fn window_outside_live_span_yields_empty_points_not_truncation() {
        let entry = entry_with(4, 1);
        entry.ring.store_sample(100, 1.0, SampleFlags::NONE);

        let points: Vec<_> = QueryCursor::new(entry, 1, 2).unwrap().collect();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.value.is_none() && p.count == 0));
        assert_eq!(points[0].end, 1);
        assert_eq!(points[1].end, 2);
    }

    #[test]
    fn window_partially_outside_live_span_mixes_empty_and_real_points() {
        let entry = entry_with(4, 1);
        entry.ring.store_sample(100, 1.0, SampleFlags::NONE);

        let points: Vec<_> = QueryCursor::new(entry, 98, 100).unwrap().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].value, None);
        assert_eq!(points[1].value, None);
        assert_eq!(points[2].value, Some(1.0));
    }

    #[test]
    fn empty_ring_yields_all_empty_points() {
        let entry = entry_with(4, 1);
        let points: Vec<_> = QueryCursor::new(entry, 10, 12).unwrap().collect();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.value.is_none()));
    }

    #[test]
    fn invalid_window_is_rejected() {
        let entry = entry_with(4, 1);
        assert!(QueryCursor::new(entry, 10, 5).is_err());
    }
}
