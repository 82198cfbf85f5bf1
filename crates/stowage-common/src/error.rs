//! Error types for Stowage
//!
//! This module defines the common error types used throughout the system.

use thiserror::Error;

/// Common result type for Stowage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Stowage
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capacity exceeded: requested {requested} bytes, available {available} bytes")]
    CapacityExceeded { requested: u64, available: u64 },

    #[error("record of {size} bytes exceeds the usable segment capacity of {max} bytes")]
    RecordTooLarge { size: u64, max: u64 },

    #[error("log segment not found: {0}")]
    SegmentNotFound(String),

    #[error("{0} is closed")]
    Closed(String),

    #[error("log segment {segment} still has {refs} outstanding references")]
    ReferenceLeak { segment: String, refs: u64 },

    // Validation errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index {index} out of bounds for read set of {count} entries")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error("unsupported serialization version: {0}")]
    UnsupportedVersion(i16),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error reports a programming or protocol mistake upstream
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::IndexOutOfBounds { .. }
                | Self::UnsupportedVersion(_)
                | Self::Deserialization(_)
        )
    }

    /// Check if a caller could reasonably retry the operation
    ///
    /// Nothing in the storage core retries on its own; this only tells the
    /// caller which failures came from the device rather than from its input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Check if this is a capacity error
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::RecordTooLarge { .. }
        )
    }
}
