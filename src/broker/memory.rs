//! In-process broker backed by one broadcast channel per topic.
//!
//! Topics are created on first use. A message published while a topic has no
//! subscribers is acknowledged and dropped, matching a broker whose consumers
//! start reading from the latest offset.

use super::{Broker, BrokerMessage, MessageStream, Producer};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct Topics {
    channels: Mutex<HashMap<String, broadcast::Sender<BrokerMessage>>>,
    capacity: usize,
}

impl Topics {
    fn sender(&self, topic: &str) -> broadcast::Sender<BrokerMessage> {
        let mut channels = self.channels.lock();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic, capacity = self.capacity, "Creating in-process topic");
                broadcast::channel(self.capacity).0
            })
            .clone()
    }
}

/// Shared in-process broker. Cloning yields a handle to the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    topics: Arc<Topics>,
}

impl MemoryBroker {
    /// Create a broker buffering up to `capacity` undelivered messages per
    /// subscriber and topic.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Topics {
                channels: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .channels
            .lock()
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        Ok(Box::new(MemoryProducer {
            topics: Arc::clone(&self.topics),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        token: CancellationToken,
    ) -> Result<MessageStream, BrokerError> {
        let receiver = self.topics.sender(topic).subscribe();

        // `remaining` is set on cancellation to the number of messages buffered
        // at that moment; the stream hands those out and ends.
        let stream = futures::stream::unfold(
            (receiver, token, None::<usize>),
            |(mut receiver, token, mut remaining)| async move {
                loop {
                    if let Some(left) = remaining {
                        if left == 0 {
                            return None;
                        }
                        let item = match receiver.try_recv() {
                            Ok(message) => Ok(message),
                            Err(TryRecvError::Lagged(skipped)) => {
                                Err(BrokerError::Lagged(skipped))
                            }
                            Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
                        };
                        return Some((item, (receiver, token, Some(left - 1))));
                    }

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => remaining = Some(receiver.len()),
                        received = receiver.recv() => {
                            let item = match received {
                                Ok(message) => Ok(message),
                                Err(RecvError::Lagged(skipped)) => {
                                    Err(BrokerError::Lagged(skipped))
                                }
                                Err(RecvError::Closed) => return None,
                            };
                            return Some((item, (receiver, token, None)));
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

struct MemoryProducer {
    topics: Arc<Topics>,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn produce(
        &self,
        topic: &str,
        key: &[u8],
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let message = BrokerMessage {
            key: key.to_vec(),
            payload,
            timestamp: Some(chrono::Utc::now()),
        };
        // No subscribers: nothing retains the message, which is still a
        // successful publish.
        let _ = self.topics.sender(topic).send(message);
        Ok(())
    }
}
