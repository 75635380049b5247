//! # Benchmark Engine Module
//!
//! This module owns the run-level view of a benchmark: the validated
//! configuration, the orchestrator that runs every topic concurrently, and
//! the once-a-second progress reporter.
//!
//! ## Run Lifecycle
//!
//! 1. **Setup**: create fresh [`RunCounters`] and a child cancellation token
//! 2. **Topics**: spawn one [`TopicRunner`] per configured topic
//! 3. **Collection**: as each topic finishes, trim its warm-up and cool-down
//!    decile and append the rest to the pooled latencies
//! 4. **Shutdown**: stop the progress reporter and hand the pooled samples
//!    back as a [`RunOutcome`]
//!
//! A fatal error in any topic (a malformed payload) cancels the whole run
//! and is returned to the caller.

use crate::{
    broker::{Broker, BrokerSettings},
    cli::{Args, BrokerKind},
    counters::{CounterSnapshot, RunCounters},
    error::ConfigError,
    metrics::{self, LatencySample},
    payload::TIMESTAMP_WIDTH,
    stop::StopCondition,
    topic::TopicRunner,
    utils::{format_duration, format_message_rate},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A helper struct to provide a consistent, single source of truth for displaying
/// the benchmark configuration at the start of a run.
struct BenchmarkConfigDisplay<'a> {
    config: &'a BenchmarkConfig,
    broker: &'a str,
}

impl<'a> std::fmt::Display for BenchmarkConfigDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Benchmark on: {} ({})", self.config.broker, self.broker)?;
        writeln!(f, "  Topics:             {}", self.config.topics.join(", "))?;
        writeln!(
            f,
            "  Message Size:       {} bytes",
            self.config.message_size
        )?;
        match self.config.stop {
            StopCondition::MessageCount(count) => {
                writeln!(f, "  Messages/Producer:  {}", count)?
            }
            StopCondition::Duration(duration) => {
                writeln!(f, "  Test Duration:      {}", format_duration(duration))?
            }
        }
        writeln!(
            f,
            "  Producers/Topic:    {}",
            self.config.producers_per_topic
        )?;
        writeln!(
            f,
            "  Rate/Producer:      {}",
            format_message_rate(self.config.producer_rate as f64)
        )?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Configuration for benchmark execution
///
/// Immutable for the duration of a run and shared by every worker behind an
/// `Arc`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Which broker adapter to drive
    pub broker: BrokerKind,

    /// Broker endpoints, passed through to the adapter
    pub broker_urls: Vec<String>,

    /// Topics to benchmark concurrently
    pub topics: Vec<String>,

    /// Size of every payload in bytes, timestamp header included
    pub message_size: usize,

    /// Per-producer message limit, or wall-clock limit per topic
    pub stop: StopCondition,

    /// Target messages per second for each producer
    ///
    /// With `producers_per_topic` producers, a topic receives roughly
    /// `producers_per_topic × producer_rate` messages per second.
    pub producer_rate: u64,

    /// Number of producer workers per topic
    pub producers_per_topic: usize,

    /// Upper bound on a consumer's final drain once its producers stopped
    pub drain_timeout: Duration,

    /// Period of the live progress line
    pub progress_interval: Duration,

    /// Per-topic buffer of the in-process broker
    pub channel_capacity: usize,
}

impl BenchmarkConfig {
    /// Configuration with default rates and sizes for `topics`.
    pub fn new(topics: Vec<String>, stop: StopCondition) -> Self {
        Self {
            broker: BrokerKind::default(),
            broker_urls: Vec::new(),
            topics,
            message_size: crate::defaults::MESSAGE_SIZE,
            stop,
            producer_rate: crate::defaults::PRODUCER_RATE,
            producers_per_topic: crate::defaults::PRODUCERS_PER_TOPIC,
            drain_timeout: crate::defaults::DRAIN_TIMEOUT,
            progress_interval: crate::defaults::PROGRESS_INTERVAL,
            channel_capacity: crate::defaults::CHANNEL_CAPACITY,
        }
    }

    /// Create benchmark configuration from CLI arguments
    ///
    /// ## Returns
    /// - `Ok(BenchmarkConfig)`: Valid configuration ready for use
    /// - `Err(anyhow::Error)`: Configuration validation failure
    pub fn from_args(args: &Args) -> Result<Self> {
        let stop = StopCondition::from_limits(args.num_messages, args.duration_limit())?;

        let config = Self {
            broker: args.driver,
            broker_urls: args
                .brokers
                .iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            topics: args.topics.iter().map(|t| t.trim().to_string()).collect(),
            message_size: args.msg_size,
            stop,
            producer_rate: args.producer_rate,
            producers_per_topic: args.producers_per_topic,
            drain_timeout: args.drain_timeout,
            progress_interval: crate::defaults::PROGRESS_INTERVAL,
            channel_capacity: args.channel_capacity,
        };
        config.validate().context("Invalid benchmark configuration")?;
        Ok(config)
    }

    /// Check the invariants every worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_size < TIMESTAMP_WIDTH {
            return Err(ConfigError::MessageSizeTooSmall {
                size: self.message_size,
                min: TIMESTAMP_WIDTH,
            });
        }
        if self.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if self.topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::EmptyTopicName);
        }
        match self.stop {
            StopCondition::MessageCount(0) => return Err(ConfigError::Zero("message count")),
            StopCondition::Duration(d) if d.is_zero() => {
                return Err(ConfigError::Zero("duration"))
            }
            _ => {}
        }
        if self.producer_rate == 0 {
            return Err(ConfigError::Zero("producer rate"));
        }
        if self.producers_per_topic == 0 {
            return Err(ConfigError::Zero("producers per topic"));
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::Zero("progress interval"));
        }
        Ok(())
    }

    /// Settings handed to the broker adapter.
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            urls: self.broker_urls.clone(),
            channel_capacity: self.channel_capacity,
        }
    }
}

/// Everything a finished run hands to the report.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Wall-clock time from run start until the last topic finished
    pub elapsed: Duration,
    /// Final sent/received totals across all topics
    pub counters: CounterSnapshot,
    /// Samples of every topic after trimming, in collection order
    pub latencies: Vec<LatencySample>,
    /// Raw (untrimmed) sample count per topic, in completion order
    pub topics: Vec<TopicSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic: String,
    pub received: usize,
    pub kept: usize,
    pub discarded: u64,
}

/// Orchestrates a benchmark run across all configured topics.
pub struct BenchmarkRunner {
    config: Arc<BenchmarkConfig>,
    broker: Arc<dyn Broker>,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config: Arc::new(config),
            broker,
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run every topic to completion and pool their trimmed latencies.
    ///
    /// Cancelling `token` winds the run down early; whatever was measured up
    /// to that point is still returned.
    pub async fn run(&self, token: CancellationToken) -> Result<RunOutcome> {
        self.config.validate()?;
        info!(
            "\n{}",
            BenchmarkConfigDisplay {
                config: &self.config,
                broker: self.broker.name(),
            }
        );

        let token = token.child_token();
        let counters = Arc::new(RunCounters::new());
        let started = Instant::now();

        let progress = spawn_progress_reporter(
            Arc::clone(&counters),
            self.config.message_size,
            self.config.progress_interval,
            started,
            token.child_token(),
        );

        let mut topics = JoinSet::new();
        for topic in &self.config.topics {
            let runner = TopicRunner::new(
                topic.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.broker),
                Arc::clone(&counters),
                token.clone(),
            );
            topics.spawn(runner.run());
        }

        let expected = self.config.stop.message_limit().map_or(0, |limit| {
            (limit as usize)
                .saturating_mul(self.config.producers_per_topic)
                .saturating_mul(self.config.topics.len())
                .min(1 << 24)
        });
        let mut latencies = Vec::with_capacity(expected);
        let mut summaries = Vec::with_capacity(self.config.topics.len());

        while let Some(joined) = topics.join_next().await {
            let result = match joined
                .context("Topic task did not complete")
                .and_then(|result| result)
            {
                Ok(result) => result,
                Err(e) => {
                    error!("Aborting benchmark: {:#}", e);
                    token.cancel();
                    topics.shutdown().await;
                    if let Err(join) = progress.await {
                        debug!("Progress reporter did not shut down cleanly: {}", join);
                    }
                    return Err(e);
                }
            };

            let kept = metrics::trim_warmup(&result.samples);
            debug!(
                topic = %result.topic,
                raw = result.samples.len(),
                kept = kept.len(),
                "Merging topic latencies"
            );
            latencies.extend_from_slice(kept);
            summaries.push(TopicSummary {
                topic: result.topic.clone(),
                received: result.samples.len(),
                kept: kept.len(),
                discarded: result.discarded,
            });
        }

        let elapsed = started.elapsed();
        token.cancel();
        if let Err(e) = progress.await {
            debug!("Progress reporter did not shut down cleanly: {}", e);
        }

        Ok(RunOutcome {
            elapsed,
            counters: counters.snapshot(),
            latencies,
            topics: summaries,
        })
    }
}

/// One line of live progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub sent: u64,
    pub received: u64,
    /// Receive rate since the previous report
    pub current_rate: f64,
    /// Receive rate since the run started
    pub average_rate: f64,
    /// Average data rate in binary megabytes per second
    pub megabytes_per_second: f64,
    pub elapsed: Duration,
}

impl ProgressReport {
    /// Build a report from two consecutive counter snapshots.
    ///
    /// Rates stay at zero until something was received and at least one
    /// second has passed, so the first ticks do not show inflated numbers.
    pub fn new(
        previous: CounterSnapshot,
        current: CounterSnapshot,
        since_previous: Duration,
        elapsed: Duration,
        message_size: usize,
    ) -> Self {
        let mut report = Self {
            sent: current.sent,
            received: current.received,
            current_rate: 0.0,
            average_rate: 0.0,
            megabytes_per_second: 0.0,
            elapsed,
        };

        if current.received > 0 && elapsed >= Duration::from_secs(1) {
            let secs = elapsed.as_secs_f64();
            report.average_rate = current.received as f64 / secs;
            report.megabytes_per_second =
                current.received as f64 * message_size as f64 / secs / 1024.0 / 1024.0;
        }
        if !since_previous.is_zero() {
            let delta = current.received.saturating_sub(previous.received);
            report.current_rate = delta as f64 / since_previous.as_secs_f64();
        }
        report
    }
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Produced: {}, Consumed: {} ({:.0} messages/sec now, {:.0} messages/sec avg, \
             {:.2} Mb/sec, running for {})",
            self.sent,
            self.received,
            self.current_rate,
            self.average_rate,
            self.megabytes_per_second,
            format_duration(self.elapsed)
        )
    }
}

/// Log a [`ProgressReport`] every `period` until `token` is cancelled.
fn spawn_progress_reporter(
    counters: Arc<RunCounters>,
    message_size: usize,
    period: Duration,
    started: Instant,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = CounterSnapshot::default();
        let mut previous_at = started;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let current = counters.snapshot();
            let report = ProgressReport::new(
                previous,
                current,
                now - previous_at,
                now - started,
                message_size,
            );
            info!("{}", report);

            previous = current;
            previous_at = now;
        }
    })
}
