//! # pulsewatch-engine
//!
//! In-process storage core for agent-resident metric collection: a packed
//! sample codec, a concurrent metric handle registry, per-metric ring
//! buffers, and a time-aligned query iterator.
//!
//! ## Quick start
//!
//! ```
//! use pulsewatch_engine::{MetricDescriptor, MetricRegistry, SampleFlags};
//!
//! let registry = MetricRegistry::new(0);
//! let handle = registry
//!     .get_or_create(MetricDescriptor::new("cpu.usage", "percentage", 1, 3600))
//!     .unwrap();
//!
//! handle.store_sample(1_700_000_000, 42.5, SampleFlags::NONE);
//!
//! let points: Vec<_> = handle
//!     .query(1_700_000_000, 1_700_000_000)
//!     .unwrap()
//!     .collect();
//! assert_eq!(points[0].value, Some(42.5));
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`sample`] | Packed 32-bit sample codec |
//! | [`metric`] | Metric identity and handle types |
//! | [`registry`] | Concurrent handle registry |
//! | [`ring`] | Fixed-capacity ring buffer storage |
//! | [`query`] | Time-aligned query iterator |
//! | [`error`] | Error types |

pub mod error;
pub mod metric;
pub mod query;
pub mod registry;
pub mod ring;
pub mod sample;

pub use error::{EngineError, Result};
pub use metric::{MetricDescriptor, MetricHandle, MetricId};
pub use query::{Point, QueryCursor};
pub use registry::MetricRegistry;
pub use sample::{Sample, SampleFlags};

impl MetricHandle {
    /// Store one collected value at `timestamp` (unix seconds).
    pub fn store_sample(&self, timestamp: i64, value: f64, flags: SampleFlags) {
        if self.entry.ring.last_timestamp().is_none() {
            self.entry.note_first_seen(timestamp);
        }
        self.entry.ring.store_sample(timestamp, value, flags);
    }

    /// Cheap retention probe: `(first_seen_s, last_seen_s)` without touching
    /// the ring's slots.
    pub fn retention(&self) -> Option<(i64, i64)> {
        self.entry.retention()
    }

    /// Flush the ring to `EMPTY` up to `up_to`, for collectors that stop
    /// without an explicit final sample.
    pub fn flush(&self, up_to: i64) {
        self.entry.ring.flush(up_to);
    }

    /// Change the collection interval going forward.
    pub fn set_update_every(&self, update_every_s: u32) {
        self.entry.ring.set_update_every(update_every_s);
    }

    /// Iterate stored points between `start` and `end` (unix seconds,
    /// inclusive), oldest first.
    pub fn query(&self, start: i64, end: i64) -> Result<QueryCursor> {
        QueryCursor::new(self.entry.clone(), start, end)
    }
}
