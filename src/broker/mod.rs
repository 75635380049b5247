//! # Broker Capability Layer
//!
//! The benchmark engine needs exactly two things from a message broker:
//! publish a keyed payload to a named topic, and read an unbounded stream of
//! payloads back from a named topic. Connection setup, partition assignment,
//! acknowledgement and retry semantics all belong to the adapter behind these
//! traits.
//!
//! Adapters hand out one [`Producer`] client per producer worker, mirroring
//! how real broker clients are typically used from independent connections.

use crate::cli::BrokerKind;
use crate::error::BrokerError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod memory;

pub use memory::MemoryBroker;

/// A message as delivered by a broker subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    /// Broker-assigned append time, when the broker reports one.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Unbounded sequence of messages from one topic.
///
/// `Err` items are transient delivery problems; the stream keeps going after
/// them. The stream ends when the broker goes away, or once the backlog
/// buffered at the time the subscription's token fired has been handed out.
pub type MessageStream = BoxStream<'static, Result<BrokerMessage, BrokerError>>;

/// Produce capability: publish one message and wait for the acknowledgement.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, topic: &str, key: &[u8], payload: Vec<u8>)
        -> Result<(), BrokerError>;
}

/// Broker adapter interface.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Adapter name for logging.
    fn name(&self) -> &'static str;

    /// Open a new producer client.
    async fn producer(&self) -> Result<Box<dyn Producer>, BrokerError>;

    /// Subscribe to `topic`. Messages published after this call returns are
    /// delivered on the stream. Once `token` is cancelled the stream hands
    /// out at most what was already buffered and then closes.
    async fn subscribe(
        &self,
        topic: &str,
        token: CancellationToken,
    ) -> Result<MessageStream, BrokerError>;
}

/// Adapter settings derived from the run configuration.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub urls: Vec<String>,
    /// Per-topic buffer for in-process delivery.
    pub channel_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            channel_capacity: crate::defaults::CHANNEL_CAPACITY,
        }
    }
}

/// Broker factory for creating adapter instances
pub struct BrokerFactory;

impl BrokerFactory {
    /// Create the adapter selected by `kind`.
    pub fn create(kind: BrokerKind, settings: &BrokerSettings) -> Result<Arc<dyn Broker>> {
        match kind {
            BrokerKind::Memory => {
                if !settings.urls.is_empty() {
                    tracing::warn!(
                        "Broker URLs {:?} are ignored by the in-process broker",
                        settings.urls
                    );
                }
                Ok(Arc::new(MemoryBroker::new(settings.channel_capacity)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_settings_default() {
        let settings = BrokerSettings::default();
        assert!(settings.urls.is_empty());
        assert_eq!(settings.channel_capacity, crate::defaults::CHANNEL_CAPACITY);
    }

    #[test]
    fn test_factory_creates_memory_broker() {
        let broker = BrokerFactory::create(BrokerKind::Memory, &BrokerSettings::default()).unwrap();
        assert_eq!(broker.name(), "memory");
    }
}
