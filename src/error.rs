//! Typed errors for the library surface.
//!
//! Orchestration code wraps these in `anyhow::Error` with context; the
//! variants here are what callers can match on.

use thiserror::Error;

/// Failures of the embedded-timestamp payload codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("message size {size} is smaller than the {width}-byte timestamp header")]
    TooSmall { size: usize, width: usize },

    #[error("payload of {len} bytes is too short to hold a timestamp header")]
    TooShort { len: usize },

    #[error("timestamp header is not a decimal number: {header:?}")]
    NotNumeric { header: String },

    #[error("timestamp {0} does not fit the fixed-width header")]
    TimestampOverflow(u64),
}

/// Failures reported by a broker adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("produce to {topic}: {reason}")]
    Produce { topic: String, reason: String },

    #[error("consume from {topic}: {reason}")]
    Consume { topic: String, reason: String },

    #[error("subscriber lagged behind, {0} messages skipped")]
    Lagged(u64),
}

/// Invalid run parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("either a message count or a duration limit must be set")]
    MissingStopCondition,

    #[error("message count and duration limits are mutually exclusive")]
    ConflictingStopConditions,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("message size must be at least {min} bytes, got {size}")]
    MessageSizeTooSmall { size: usize, min: usize },

    #[error("at least one topic name is required")]
    NoTopics,

    #[error("topic names must not be empty")]
    EmptyTopicName,
}
