//! # Topic Run Coordinator
//!
//! Runs one topic end to end:
//!
//! 1. subscribe, so that nothing published from here on is missed;
//! 2. start the producer workers, each with its own broker client;
//! 3. start the consumer worker on the subscription;
//! 4. wait for every producer to stop;
//! 5. signal the consumer to drain: it reads what the subscription already
//!    buffered and returns as soon as nothing is left. `drain_timeout` caps
//!    that drain, after which the consumer is cancelled outright.
//!
//! Starting producers only after the subscription exists, and stopping the
//! consumer only after the producers are done, keeps early and late messages
//! from being silently lost and skewing latencies downwards.

use crate::{
    benchmark::BenchmarkConfig,
    broker::Broker,
    consumer::{ConsumerWorker, TopicResult},
    counters::RunCounters,
    producer::{ProducerExit, ProducerReport, ProducerWorker},
    utils::current_timestamp_ns,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TopicRunner {
    topic: String,
    config: Arc<BenchmarkConfig>,
    broker: Arc<dyn Broker>,
    counters: Arc<RunCounters>,
    token: CancellationToken,
}

impl TopicRunner {
    /// `token` is the run-wide token; the topic derives its own child from it.
    pub fn new(
        topic: impl Into<String>,
        config: Arc<BenchmarkConfig>,
        broker: Arc<dyn Broker>,
        counters: Arc<RunCounters>,
        token: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            config,
            broker,
            counters,
            token,
        }
    }

    pub async fn run(self) -> Result<TopicResult> {
        let token = self.token.child_token();
        let started = Instant::now();
        let start_ns = current_timestamp_ns();

        let stream = self
            .broker
            .subscribe(&self.topic, token.clone())
            .await
            .with_context(|| format!("Failed to subscribe to topic {}", self.topic))?;

        let mut producers = JoinSet::new();
        for producer_id in 0..self.config.producers_per_topic {
            let client = match self.broker.producer().await {
                Ok(client) => client,
                Err(e) => {
                    token.cancel();
                    join_producers(&mut producers, &self.topic).await;
                    return Err(e).with_context(|| {
                        format!("Failed to create producer for topic {}", self.topic)
                    });
                }
            };
            let worker = ProducerWorker::new(
                producer_id,
                self.topic.clone(),
                client,
                &self.config,
                Arc::clone(&self.counters),
                token.clone(),
            );
            producers.spawn(worker.run(started));
        }

        let drain = CancellationToken::new();
        let consumer = ConsumerWorker::new(
            self.topic.clone(),
            stream,
            self.config
                .stop
                .scaled(self.config.producers_per_topic as u64),
            Arc::clone(&self.counters),
            token.clone(),
            start_ns,
        )
        .with_drain(drain.clone());
        let mut consumer: JoinHandle<Result<TopicResult>> =
            tokio::spawn(consumer.run(started));

        info!(
            topic = %self.topic,
            producers = self.config.producers_per_topic,
            "Topic started"
        );

        let sent = tokio::select! {
            sent = join_producers(&mut producers, &self.topic) => sent,
            joined = &mut consumer => {
                // The consumer only finishes first on a fatal error or once it
                // has seen every expected message.
                let result = flatten(joined, &self.topic);
                if result.is_err() {
                    token.cancel();
                }
                join_producers(&mut producers, &self.topic).await;
                token.cancel();
                return result;
            }
        };
        debug!(topic = %self.topic, sent, "All producers finished, draining consumer");
        drain.cancel();

        let joined = match timeout(self.config.drain_timeout, &mut consumer).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    topic = %self.topic,
                    "Consumer still draining after {:?}, cancelling",
                    self.config.drain_timeout
                );
                token.cancel();
                consumer.await
            }
        };
        token.cancel();

        let result = flatten(joined, &self.topic)?;
        info!(
            topic = %self.topic,
            sent,
            received = result.samples.len(),
            "Topic finished"
        );
        Ok(result)
    }
}

/// Wait for every producer of a topic, returning how many messages they sent.
async fn join_producers(producers: &mut JoinSet<ProducerReport>, topic: &str) -> u64 {
    let mut sent = 0;
    while let Some(joined) = producers.join_next().await {
        match joined {
            Ok(report) => {
                if let ProducerExit::Failed(reason) = &report.exit {
                    warn!(
                        topic,
                        producer = report.producer_id,
                        "Producer failed after {} messages: {}",
                        report.sent,
                        reason
                    );
                }
                sent += report.sent;
            }
            Err(e) => warn!(topic, "Producer task did not complete: {}", e),
        }
    }
    sent
}

fn flatten(
    joined: Result<Result<TopicResult>, tokio::task::JoinError>,
    topic: &str,
) -> Result<TopicResult> {
    joined.with_context(|| format!("Consumer task for topic {} did not complete", topic))?
}
