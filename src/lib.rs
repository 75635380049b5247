//! # Stream Bench Library
//!
//! End-to-end latency and throughput benchmarking for publish/subscribe
//! brokers. Producers embed their send time in every payload; a consumer on
//! the same topic subtracts it from the receive time. Samples from every
//! topic are pooled, trimmed and reduced to percentiles.
//!
//! ## Architecture Overview
//!
//! - `benchmark`: configuration and the run orchestrator
//! - `topic`: one topic's producers and consumer
//! - `producer` / `consumer`: the per-task worker loops
//! - `broker`: the produce/subscribe capability and the in-process broker
//! - `payload`: the timestamp-header codec
//! - `metrics`: trimming, percentiles and throughput
//! - `results`: console summary, JSON output and the latency trace
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_bench::{BenchmarkConfig, BenchmarkRunner, MemoryBroker, StopCondition};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stop = StopCondition::MessageCount(10_000);
//!     let mut config = BenchmarkConfig::new(vec!["orders".into()], stop);
//!     config.producer_rate = 5_000;
//!
//!     let runner = BenchmarkRunner::new(config, Arc::new(MemoryBroker::new(65_536)));
//!     let outcome = runner.run(CancellationToken::new()).await?;
//!
//!     println!("Received {} messages", outcome.counters.received);
//!     Ok(())
//! }
//! ```

/// Run configuration and the multi-topic orchestrator
pub mod benchmark;

/// Broker capability traits and adapters
pub mod broker;

/// Command-line interface and configuration
pub mod cli;

pub mod consumer;
pub mod counters;
pub mod error;

/// Console and file logging setup
pub mod logging;

/// Latency statistics and throughput calculation
pub mod metrics;

pub mod payload;
pub mod producer;
pub mod rate_limiter;

/// Final report rendering and persistence
pub mod results;

pub mod stop;
pub mod topic;
pub mod utils;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner, RunOutcome};
pub use broker::{Broker, BrokerMessage, MemoryBroker, Producer};
pub use cli::{Args, BrokerKind};
pub use counters::RunCounters;
pub use metrics::{LatencyMetrics, ThroughputMetrics};
pub use results::{BenchmarkReport, ResultsManager};
pub use stop::StopCondition;

/// The current version of stream bench, recorded in JSON results
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default message size in bytes, timestamp header included
    pub const MESSAGE_SIZE: usize = 128;

    /// Default messages per second for each producer
    pub const PRODUCER_RATE: u64 = 1000;

    pub const PRODUCERS_PER_TOPIC: usize = 1;

    pub const TOPIC: &str = "topic";

    /// Default file for the down-sampled latency trace
    pub const LATENCY_FILE: &str = "latencies.csv";

    /// Messages buffered per topic by the in-process broker
    ///
    /// A consumer falling further behind than this loses messages and
    /// reports a lag error.
    pub const CHANNEL_CAPACITY: usize = 65_536;

    pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

    /// Cap on a consumer's final drain after its producers stopped
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
}
