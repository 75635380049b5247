use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// When a topic's workers stop: after a number of messages or after a
/// wall-clock duration measured from the topic's start. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    MessageCount(u64),
    Duration(Duration),
}

impl StopCondition {
    /// Build a stop condition from optional user limits, enforcing that
    /// exactly one is set and that it is positive.
    pub fn from_limits(
        message_count: Option<u64>,
        duration: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        match (message_count, duration) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingStopConditions),
            (None, None) => Err(ConfigError::MissingStopCondition),
            (Some(0), None) => Err(ConfigError::Zero("message count")),
            (None, Some(d)) if d.is_zero() => Err(ConfigError::Zero("duration")),
            (Some(count), None) => Ok(Self::MessageCount(count)),
            (None, Some(d)) => Ok(Self::Duration(d)),
        }
    }

    /// True once `processed` messages or the time since `started` satisfy the limit.
    pub fn is_reached(&self, processed: u64, started: Instant) -> bool {
        match *self {
            Self::MessageCount(limit) => processed >= limit,
            Self::Duration(limit) => started.elapsed() >= limit,
        }
    }

    /// The same condition applied to `factor` workers' worth of messages.
    ///
    /// A topic consumer sees the output of every producer on that topic, so its
    /// message limit is the per-producer limit times the producer count.
    pub fn scaled(&self, factor: u64) -> Self {
        match *self {
            Self::MessageCount(limit) => Self::MessageCount(limit.saturating_mul(factor)),
            other => other,
        }
    }

    /// Expected number of messages, if the condition is count based.
    pub fn message_limit(&self) -> Option<u64> {
        match *self {
            Self::MessageCount(limit) => Some(limit),
            Self::Duration(_) => None,
        }
    }
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageCount(limit) => write!(f, "{} messages", limit),
            Self::Duration(limit) => write!(f, "{:?}", limit),
        }
    }
}
