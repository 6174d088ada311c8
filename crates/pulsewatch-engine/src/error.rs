use thiserror::Error;

use crate::metric::MetricId;

/// Errors raised by the registry, ring buffer, and query cursor.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("metric {0:?} is not registered")]
    UnknownMetric(MetricId),

    #[error("metric name `{0}` is already registered with a different descriptor")]
    DescriptorMismatch(String),

    #[error("ring capacity must be nonzero")]
    ZeroCapacity,

    #[error("update_every must be a positive number of seconds")]
    InvalidUpdateEvery,

    #[error("query window start {start} is after end {end}")]
    InvalidWindow { start: i64, end: i64 },

    #[error("registry is at capacity ({0} metrics)")]
    RegistryFull(usize),
}

pub type Result<T> = std::result::Result<T, EngineError>;
