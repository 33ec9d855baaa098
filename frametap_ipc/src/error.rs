//! Error types for shared memory data plane operations.

use frametap_common::error::CollectionError;
use frametap_common::metric::MetricId;
use thiserror::Error;

/// Errors that can occur while building or accessing the data plane.
#[derive(Error, Debug)]
pub enum IpcError {
    /// A telemetry ring set is already mapped for this metric.
    #[error("telemetry ring already present for metric {metric:?}")]
    AlreadyPresent {
        /// Metric whose registration was repeated.
        metric: MetricId,
    },

    /// A lookup into a registry or map found nothing.
    #[error("{what} not present: key {key}")]
    NotPresent {
        /// Kind of entity looked up.
        what: &'static str,
        /// Key used for the lookup.
        key: u64,
    },

    /// A segment could not be created or opened.
    #[error("segment unavailable: {name}: {source}")]
    SegmentUnavailable {
        /// Segment name.
        name: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A mapped segment failed validation.
    #[error("invalid segment {name}: {reason}")]
    InvalidSegment {
        /// Segment name.
        name: String,
        /// What failed to validate.
        reason: &'static str,
    },

    /// The middleware holdoff semaphore was not posted in time.
    #[error("timed out waiting for introspection ({timeout_ms} ms)")]
    IntrospectionTimeout {
        /// Wait budget that elapsed.
        timeout_ms: u64,
    },

    /// Ring capacity below the safe minimum.
    #[error("ring capacity {capacity} below minimum {min}")]
    RingCapacity {
        /// Requested capacity.
        capacity: usize,
        /// Minimum allowed capacity (twice the read margin).
        min: usize,
    },

    /// The telemetry metric directory is full.
    #[error("telemetry map full: capacity {capacity} metrics")]
    MapFull {
        /// Directory capacity.
        capacity: usize,
    },

    /// The telemetry ring arena cannot host another ring set.
    #[error("telemetry arena exhausted: need {needed} bytes, {available} available")]
    ArenaExhausted {
        /// Bytes the new ring set requires.
        needed: usize,
        /// Bytes left in the arena.
        available: usize,
    },

    /// A typed ring lookup did not match the stored value kind.
    #[error("value kind mismatch for metric {metric:?}")]
    ValueKindMismatch {
        /// Metric whose rings were requested with the wrong type.
        metric: MetricId,
    },

    /// A computed store layout does not fit its segment.
    #[error("segment layout overflow: need {needed} bytes, have {available}")]
    LayoutOverflow {
        /// Bytes the layout requires.
        needed: usize,
        /// Segment payload bytes available.
        available: usize,
    },

    /// An introspection arena is out of slots.
    #[error("introspection arena full: {what}")]
    IntrospectionFull {
        /// Which arena overflowed.
        what: &'static str,
    },

    /// A process-shared sync primitive failed.
    #[error("sync primitive failure: {source}")]
    Sync {
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Bounded container failure.
    #[error("collection error: {source}")]
    Collection {
        /// Source error.
        #[from]
        source: CollectionError,
    },

    /// IO error.
    #[error("IO error: {source}")]
    Io {
        /// Source IO error.
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error.
    #[error("system call error: {source}")]
    Nix {
        /// Source nix error.
        #[from]
        source: nix::Error,
    },
}

/// Result type for data plane operations.
pub type IpcResult<T> = Result<T, IpcError>;
