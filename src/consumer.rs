//! # Consumer Worker
//!
//! Reads a topic's message stream, recovers each message's send time from
//! its payload and records `now - send_time` as a latency sample.
//!
//! Samples stamped before the topic started (leftovers from an earlier run)
//! or after the current wall-clock time (clock anomalies) are dropped without
//! being counted. A payload whose header cannot be parsed means producer and
//! consumer disagree on the message format, which invalidates the whole run,
//! so it is returned as an error.
//!
//! Two signals end the loop early. The cancellation token stops it before the
//! next message, however many are waiting. The drain token stops it once the
//! stream has nothing buffered, which is how a topic winds down after its
//! producers finished.

use crate::{
    broker::{BrokerMessage, MessageStream},
    counters::RunCounters,
    error::BrokerError,
    metrics::LatencySample,
    payload,
    stop::StopCondition,
    utils::current_timestamp_ns,
};
use anyhow::{Context, Result};
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Latency samples gathered by one topic's consumer, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicResult {
    pub topic: String,
    pub samples: Vec<LatencySample>,
    /// Messages dropped as stale or future-dated.
    pub discarded: u64,
}

pub struct ConsumerWorker {
    topic: String,
    stream: MessageStream,
    stop: StopCondition,
    counters: Arc<RunCounters>,
    token: CancellationToken,
    drain: CancellationToken,
    topic_start_ns: u64,
    expected: usize,
}

impl ConsumerWorker {
    /// `stop` is the topic-wide limit (see [`StopCondition::scaled`]).
    /// `topic_start_ns` is the wall-clock start of the topic in nanoseconds
    /// since the Unix epoch.
    ///
    /// The worker never drains on its own; call [`ConsumerWorker::with_drain`]
    /// to hand it a drain signal.
    pub fn new(
        topic: impl Into<String>,
        stream: MessageStream,
        stop: StopCondition,
        counters: Arc<RunCounters>,
        token: CancellationToken,
        topic_start_ns: u64,
    ) -> Self {
        // Cap the up-front allocation; duration runs grow as needed.
        let expected = stop
            .message_limit()
            .map_or(0, |limit| limit.min(1 << 20) as usize);

        Self {
            topic: topic.into(),
            stream,
            stop,
            counters,
            token,
            drain: CancellationToken::new(),
            topic_start_ns,
            expected,
        }
    }

    /// Stop once `drain` is cancelled and the stream has nothing buffered.
    pub fn with_drain(mut self, drain: CancellationToken) -> Self {
        self.drain = drain;
        self
    }

    /// Consume until the stream ends, the token is cancelled or the stop
    /// condition holds. `topic_started` anchors duration limits.
    pub async fn run(mut self, topic_started: Instant) -> Result<TopicResult> {
        let mut samples = Vec::with_capacity(self.expected);
        let mut discarded = 0u64;

        loop {
            if self.token.is_cancelled() {
                break;
            }

            let item = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                item = self.stream.next() => item,
                _ = self.drain.cancelled() => match self.next_buffered().await {
                    Some(item) => item,
                    None => break,
                },
            };

            let message = match item {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    if self.token.is_cancelled() {
                        break;
                    }
                    warn!(topic = %self.topic, "Consume error, continuing: {}", e);
                    continue;
                }
                None => break,
            };

            let sent_ns = payload::decode(&message.payload).with_context(|| {
                format!(
                    "Malformed payload on topic {} ({} bytes); check that producer and \
                     consumer use the same message format",
                    self.topic,
                    message.payload.len()
                )
            })?;

            let now_ns = current_timestamp_ns();
            if sent_ns < self.topic_start_ns || sent_ns > now_ns {
                discarded += 1;
                continue;
            }

            samples.push(Duration::from_nanos(now_ns - sent_ns));
            self.counters.record_received();

            if self.stop.is_reached(samples.len() as u64, topic_started) {
                debug!(topic = %self.topic, "Consumer reached {}", self.stop);
                break;
            }
        }

        if discarded > 0 {
            info!(topic = %self.topic, "Discarded {} stale or future-dated messages", discarded);
        }
        debug!(topic = %self.topic, samples = samples.len(), "Consumer finished");

        Ok(TopicResult {
            topic: self.topic,
            samples,
            discarded,
        })
    }

    /// The next stream item if one is already buffered, `None` otherwise.
    ///
    /// Yields first so that a pending stream means an empty buffer rather
    /// than an exhausted cooperative budget.
    async fn next_buffered(&mut self) -> Option<Option<Result<BrokerMessage, BrokerError>>> {
        tokio::task::yield_now().await;
        self.stream.next().now_or_never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Item = Result<BrokerMessage, BrokerError>;

    fn message(payload: Vec<u8>) -> Item {
        Ok(BrokerMessage {
            key: Vec::new(),
            payload,
            timestamp: None,
        })
    }

    fn fresh() -> Item {
        message(payload::encode(current_timestamp_ns(), 32).unwrap())
    }

    fn stream_of(items: Vec<Item>) -> MessageStream {
        futures::stream::iter(items).boxed()
    }

    fn worker(items: Vec<Item>, start_ns: u64) -> (ConsumerWorker, Arc<RunCounters>) {
        let counters = Arc::new(RunCounters::new());
        let worker = ConsumerWorker::new(
            "t",
            stream_of(items),
            StopCondition::MessageCount(1000),
            Arc::clone(&counters),
            CancellationToken::new(),
            start_ns,
        );
        (worker, counters)
    }

    #[tokio::test]
    async fn test_records_latency_for_fresh_messages() {
        let start_ns = current_timestamp_ns();
        let items = (0..5).map(|_| fresh()).collect();
        let (worker, counters) = worker(items, start_ns);

        let result = worker.run(Instant::now()).await.unwrap();

        assert_eq!(result.topic, "t");
        assert_eq!(result.samples.len(), 5);
        assert_eq!(result.discarded, 0);
        assert_eq!(counters.received(), 5);
        assert!(result.samples.iter().all(|s| *s < Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_discards_messages_from_before_topic_start() {
        let start_ns = current_timestamp_ns();
        let stale = start_ns - Duration::from_secs(10).as_nanos() as u64;
        let items = vec![message(payload::encode(stale, 32).unwrap())];
        let (worker, counters) = worker(items, start_ns);

        let result = worker.run(Instant::now()).await.unwrap();

        assert!(result.samples.is_empty());
        assert_eq!(result.discarded, 1);
        assert_eq!(counters.received(), 0);
    }

    #[tokio::test]
    async fn test_discards_future_dated_messages() {
        let start_ns = current_timestamp_ns();
        let future = start_ns + Duration::from_secs(3600).as_nanos() as u64;
        let items = vec![message(payload::encode(future, 32).unwrap())];
        let (worker, counters) = worker(items, start_ns);

        let result = worker.run(Instant::now()).await.unwrap();

        assert!(result.samples.is_empty());
        assert_eq!(result.discarded, 1);
        assert_eq!(counters.received(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_fatal() {
        let start_ns = current_timestamp_ns();
        let items = vec![message(b"not-a-timestamp-at-all".to_vec())];
        let (worker, counters) = worker(items, start_ns);

        let err = worker.run(Instant::now()).await.unwrap_err();

        assert!(err.to_string().contains("Malformed payload on topic t"));
        assert!(err.downcast_ref::<crate::error::PayloadError>().is_some());
        assert_eq!(counters.received(), 0);
    }

    #[tokio::test]
    async fn test_stream_errors_are_skipped() {
        let start_ns = current_timestamp_ns();
        let items = vec![
            Err(BrokerError::Lagged(4)),
            message(payload::encode(current_timestamp_ns(), 19).unwrap()),
            Err(BrokerError::Consume {
                topic: "t".to_string(),
                reason: "rebalance".to_string(),
            }),
            message(payload::encode(current_timestamp_ns(), 19).unwrap()),
        ];
        let (worker, counters) = worker(items, start_ns);

        let result = worker.run(Instant::now()).await.unwrap();

        assert_eq!(result.samples.len(), 2);
        assert_eq!(counters.received(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_message_limit() {
        let start_ns = current_timestamp_ns();
        let items = (0..10).map(|_| fresh()).collect();
        let counters = Arc::new(RunCounters::new());
        let worker = ConsumerWorker::new(
            "t",
            stream_of(items),
            StopCondition::MessageCount(4),
            Arc::clone(&counters),
            CancellationToken::new(),
            start_ns,
        );

        let result = worker.run(Instant::now()).await.unwrap();

        assert_eq!(result.samples.len(), 4);
        assert_eq!(counters.received(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_ends_idle_consumer() {
        let token = CancellationToken::new();
        let worker = ConsumerWorker::new(
            "t",
            futures::stream::pending::<Item>().boxed(),
            StopCondition::MessageCount(10),
            Arc::new(RunCounters::new()),
            token.clone(),
            current_timestamp_ns(),
        );
        let handle = tokio::spawn(worker.run(Instant::now()));

        token.cancel();
        let result = handle.await.unwrap().unwrap();
        assert!(result.samples.is_empty());
    }

    /// A backlog of leftovers from an earlier run that never runs dry.
    fn endless_stale_backlog(start_ns: u64) -> MessageStream {
        let stale = start_ns - Duration::from_secs(10).as_nanos() as u64;
        futures::stream::repeat_with(move || message(payload::encode(stale, 32).unwrap())).boxed()
    }

    #[tokio::test]
    async fn test_cancelled_consumer_ignores_ready_backlog() {
        let start_ns = current_timestamp_ns();
        let token = CancellationToken::new();
        token.cancel();
        let worker = ConsumerWorker::new(
            "t",
            endless_stale_backlog(start_ns),
            StopCondition::MessageCount(10),
            Arc::new(RunCounters::new()),
            token,
            start_ns,
        );

        let result = tokio::time::timeout(Duration::from_secs(2), worker.run(Instant::now()))
            .await
            .expect("cancelled consumer must not keep reading")
            .unwrap();
        assert!(result.samples.is_empty());
        assert_eq!(result.discarded, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_interrupts_busy_consumer() {
        let start_ns = current_timestamp_ns();
        let token = CancellationToken::new();
        let worker = ConsumerWorker::new(
            "t",
            endless_stale_backlog(start_ns),
            StopCondition::MessageCount(10),
            Arc::new(RunCounters::new()),
            token.clone(),
            start_ns,
        );
        let handle = tokio::spawn(worker.run(Instant::now()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer must observe cancellation between messages")
            .unwrap()
            .unwrap();
        assert!(result.discarded > 0);
        assert!(result.samples.is_empty());
    }

    #[tokio::test]
    async fn test_drain_reads_buffered_messages_then_stops() {
        let drain = CancellationToken::new();
        drain.cancel();
        let items: Vec<Item> = (0..3).map(|_| fresh()).collect();
        let stream = futures::stream::iter(items)
            .chain(futures::stream::pending())
            .boxed();
        let worker = ConsumerWorker::new(
            "t",
            stream,
            StopCondition::MessageCount(100),
            Arc::new(RunCounters::new()),
            CancellationToken::new(),
            current_timestamp_ns(),
        )
        .with_drain(drain);

        let result = tokio::time::timeout(Duration::from_secs(2), worker.run(Instant::now()))
            .await
            .expect("drained consumer must stop once the stream is empty")
            .unwrap();
        assert_eq!(result.samples.len(), 3);
    }
}
