use clap::{ArgGroup, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Stream Bench - end-to-end latency and throughput benchmark for pub/sub brokers
#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about, long_about = None)]
#[clap(group(
    ArgGroup::new("stop_condition")
        .required(true)
        .args(["num_messages", "duration", "minutes"])
))]
pub struct Args {
    /// Broker URL or comma-separated list of broker URLs
    #[clap(short = 'b', long, value_delimiter = ',', help_heading = "Broker")]
    pub brokers: Vec<String>,

    /// Broker driver to use
    #[clap(long, value_enum, default_value_t = BrokerKind::Memory, help_heading = "Broker")]
    pub driver: BrokerKind,

    /// Per-topic buffer of the in-process broker, in messages
    #[clap(long, default_value_t = crate::defaults::CHANNEL_CAPACITY, help_heading = "Broker")]
    pub channel_capacity: usize,

    /// Comma-separated list of topic names
    #[clap(
        short = 't',
        long,
        value_delimiter = ',',
        default_value = crate::defaults::TOPIC,
        help_heading = "Core Options"
    )]
    pub topics: Vec<String>,

    /// Message size in bytes (at least 19, the timestamp header)
    #[clap(
        short = 's',
        long,
        default_value_t = crate::defaults::MESSAGE_SIZE,
        help_heading = "Core Options"
    )]
    pub msg_size: usize,

    /// Number of messages to send per producer
    #[clap(short = 'n', long, help_heading = "Core Options")]
    pub num_messages: Option<u64>,

    /// Duration to run the benchmark (e.g. "90s", "5m", "1h")
    #[clap(short = 'd', long, value_parser = parse_duration, help_heading = "Core Options")]
    pub duration: Option<Duration>,

    /// Number of minutes to run the benchmark
    #[clap(long, help_heading = "Core Options")]
    pub minutes: Option<u64>,

    /// Messages per second to produce, per producer
    #[clap(
        short = 'r',
        long,
        default_value_t = crate::defaults::PRODUCER_RATE,
        help_heading = "Core Options"
    )]
    pub producer_rate: u64,

    /// Number of producers per topic
    #[clap(
        short = 'p',
        long,
        default_value_t = crate::defaults::PRODUCERS_PER_TOPIC,
        help_heading = "Core Options"
    )]
    pub producers_per_topic: usize,

    /// Upper bound on the consumer's final drain after producers finish
    #[clap(
        long,
        value_parser = parse_duration,
        default_value = "5s",
        help_heading = "Core Options"
    )]
    pub drain_timeout: Duration,

    /// File receiving every 10th latency sample in milliseconds
    #[clap(long, default_value = crate::defaults::LATENCY_FILE, help_heading = "Output")]
    pub latency_file: PathBuf,

    /// Optional JSON file for the full results
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Also write logs to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,
}

impl Args {
    /// Wall-clock limit from either `--duration` or `--minutes`.
    pub fn duration_limit(&self) -> Option<Duration> {
        self.duration
            .or_else(|| self.minutes.map(|m| Duration::from_secs(m.saturating_mul(60))))
    }
}

/// Available broker adapters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// In-process broker, useful for measuring harness overhead
    #[default]
    #[clap(name = "memory")]
    Memory,
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerKind::Memory => write!(f, "In-process memory broker"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration {}: {}", s, e))
}
