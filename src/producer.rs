//! # Producer Worker
//!
//! One producer worker drives one broker producer client against one topic.
//! Every iteration waits on the worker's own [`RateLimiter`], stamps a fresh
//! payload with the current wall-clock time, publishes it, and then checks
//! the stop condition.
//!
//! A failed publish ends the worker: retrying is the adapter's business. The
//! cancellation token is checked before each publish and raced against the
//! rate limiter sleep, never against an in-flight publish, so a message is
//! either fully handed to the broker or not sent at all.

use crate::{
    benchmark::BenchmarkConfig,
    broker::Producer,
    counters::RunCounters,
    payload,
    rate_limiter::RateLimiter,
    stop::StopCondition,
    utils::current_timestamp_ns,
};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Key attached to every benchmark message.
pub const MESSAGE_KEY: &[u8] = b"";

/// Why a producer worker returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerExit {
    StopConditionReached,
    Cancelled,
    Failed(String),
}

/// Outcome of a single producer worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub producer_id: usize,
    pub sent: u64,
    pub exit: ProducerExit,
}

pub struct ProducerWorker {
    producer_id: usize,
    topic: String,
    client: Box<dyn Producer>,
    message_size: usize,
    stop: StopCondition,
    rate_limiter: RateLimiter,
    counters: Arc<RunCounters>,
    token: CancellationToken,
}

impl ProducerWorker {
    pub fn new(
        producer_id: usize,
        topic: impl Into<String>,
        client: Box<dyn Producer>,
        config: &BenchmarkConfig,
        counters: Arc<RunCounters>,
        token: CancellationToken,
    ) -> Self {
        Self {
            producer_id,
            topic: topic.into(),
            client,
            message_size: config.message_size,
            stop: config.stop,
            rate_limiter: RateLimiter::new(config.producer_rate),
            counters,
            token,
        }
    }

    /// Publish until the stop condition holds, the token is cancelled, or
    /// the broker rejects a message. `topic_started` anchors duration limits.
    pub async fn run(mut self, topic_started: Instant) -> ProducerReport {
        debug!(
            topic = %self.topic,
            producer = self.producer_id,
            interval = ?self.rate_limiter.interval(),
            "Producer started"
        );
        let mut sent = 0u64;

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break ProducerExit::Cancelled,
                _ = self.rate_limiter.wait() => {}
            }

            let sent_at = Instant::now();
            let message = match payload::encode(current_timestamp_ns(), self.message_size) {
                Ok(message) => message,
                Err(e) => {
                    error!(
                        topic = %self.topic,
                        producer = self.producer_id,
                        "Failed to build payload: {}",
                        e
                    );
                    break ProducerExit::Failed(e.to_string());
                }
            };

            if self.token.is_cancelled() {
                break ProducerExit::Cancelled;
            }

            if let Err(e) = self.client.produce(&self.topic, MESSAGE_KEY, message).await {
                error!(
                    topic = %self.topic,
                    producer = self.producer_id,
                    "Failed to produce: {}",
                    e
                );
                break ProducerExit::Failed(e.to_string());
            }

            self.counters.record_sent();
            self.rate_limiter.record_sent(sent_at);
            sent += 1;

            if self.stop.is_reached(sent, topic_started) {
                info!(
                    topic = %self.topic,
                    producer = self.producer_id,
                    "Producer stopping after {} ({} sent)",
                    self.stop,
                    sent
                );
                break ProducerExit::StopConditionReached;
            }
        };

        ProducerReport {
            producer_id: self.producer_id,
            sent,
            exit,
        }
    }
}
