//! Error types for the bounded collections.

use thiserror::Error;

/// Errors raised by fixed-capacity containers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionError {
    /// A mutation would grow the container past its fixed capacity.
    #[error("capacity exceeded: limit is {capacity} elements")]
    CapacityExceeded {
        /// Fixed capacity of the container.
        capacity: usize,
    },

    /// A checked access referenced an element past the end.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current element count.
        len: usize,
    },
}

/// Result alias for bounded-container operations.
pub type CollectionResult<T> = Result<T, CollectionError>;
