//! Final report of a run: console summary, JSON document and the
//! down-sampled latency trace.

use crate::{
    benchmark::{BenchmarkConfig, RunOutcome, TopicSummary},
    metrics::{to_millis, LatencyMetrics, LatencySample, ThroughputMetrics},
    utils::{format_duration, generate_run_id},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Keep one latency in this many for the trace file.
pub const TRACE_SAMPLE_EVERY: usize = 10;

/// Complete results of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub config: BenchmarkConfig,
    pub elapsed: Duration,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Throughput of received messages; `None` when nothing arrived
    pub throughput: Option<ThroughputMetrics>,
    /// Statistics over the trimmed samples; `None` when nothing arrived
    pub latency: Option<LatencyMetrics>,
    pub topics: Vec<TopicSummary>,
    pub system_info: SystemInfo,
    pub command_line: Vec<String>,
    /// Every 10th pooled latency in milliseconds, in collection order
    #[serde(skip)]
    pub latency_trace: Vec<f64>,
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl BenchmarkReport {
    /// Build the report, consuming the pooled latencies of `outcome`.
    ///
    /// The trace is taken before the latencies are sorted for statistics.
    pub fn new(config: &BenchmarkConfig, outcome: RunOutcome, command_line: Vec<String>) -> Self {
        let RunOutcome {
            elapsed,
            counters,
            mut latencies,
            topics,
        } = outcome;

        let latency_trace = trace_of(&latencies);
        let latency = LatencyMetrics::compute(&mut latencies);
        let throughput = (counters.received > 0)
            .then(|| ThroughputMetrics::new(counters.received, config.message_size, elapsed));

        Self {
            run_id: generate_run_id(),
            timestamp: chrono::Utc::now(),
            config: config.clone(),
            elapsed,
            messages_sent: counters.sent,
            messages_received: counters.received,
            throughput,
            latency,
            topics,
            system_info: SystemInfo::default(),
            command_line,
            latency_trace,
        }
    }
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Messages sent: {}", self.messages_sent)?;
        writeln!(f, "Messages received: {}", self.messages_received)?;

        match (&self.throughput, &self.latency) {
            (Some(throughput), Some(latency)) => {
                writeln!(
                    f,
                    "Message throughput: {:.2} messages/sec",
                    throughput.messages_per_second
                )?;
                writeln!(
                    f,
                    "Data throughput: {:.6} Mb/sec",
                    throughput.megabytes_per_second
                )?;
                writeln!(f, "Samples used for statistics: {}", latency.total_samples)?;
                let ms = |ns: u64| ns as f64 / 1_000_000.0;
                writeln!(f, "Min latency: {:.3} ms.", ms(latency.min_ns))?;
                writeln!(f, "P90 latency: {:.3} ms.", ms(latency.p90_ns))?;
                writeln!(f, "P99 latency: {:.3} ms.", ms(latency.p99_ns))?;
                writeln!(f, "P99.9 latency: {:.3} ms.", ms(latency.p999_ns))?;
                writeln!(f, "Max latency: {:.3} ms.", ms(latency.max_ns))?;
                writeln!(f, "Latency StdDev: {:.6}", latency.std_dev_ms)?;
                writeln!(f, "Latency StdErr: {:.6}", latency.std_err_ms)?;
            }
            _ => writeln!(
                f,
                "No messages received in {}",
                format_duration(self.elapsed)
            )?,
        }

        writeln!(f, "Total elapsed time: {}", format_duration(self.elapsed))?;
        write!(f, "Commandline arguments: {}", self.command_line.join(" "))
    }
}

/// Every `every`-th element, starting with the first.
pub fn downsample<T: Copy>(values: &[T], every: usize) -> impl Iterator<Item = T> + '_ {
    values.iter().step_by(every.max(1)).copied()
}

/// Write one millisecond value per line.
pub fn write_latency_trace<W: Write>(mut writer: W, values: &[f64]) -> std::io::Result<()> {
    let mut buffer = ryu::Buffer::new();
    for value in values {
        writer.write_all(buffer.format(*value).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Trace of the milliseconds of `latencies` as [`write_latency_trace`] would
/// persist them.
pub fn trace_of(latencies: &[LatencySample]) -> Vec<f64> {
    downsample(latencies, TRACE_SAMPLE_EVERY).map(to_millis).collect()
}

/// Writes a finished report to the console and the configured files.
pub struct ResultsManager {
    latency_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
}

impl ResultsManager {
    pub fn new(latency_file: Option<PathBuf>, output_file: Option<PathBuf>) -> Self {
        Self {
            latency_file,
            output_file,
        }
    }

    pub fn publish(&self, report: &BenchmarkReport) -> Result<()> {
        println!("{}", report);

        if let Some(path) = &self.latency_file {
            Self::write_trace(path, &report.latency_trace)?;
            info!(
                "Wrote {} latency samples to {}",
                report.latency_trace.len(),
                path.display()
            );
        }

        if let Some(path) = &self.output_file {
            let json = serde_json::to_string_pretty(report)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write results to {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        Ok(())
    }

    fn write_trace(path: &Path, values: &[f64]) -> Result<()> {
        debug!("Writing latency trace to {}", path.display());
        let file = File::create(path)
            .with_context(|| format!("Failed to create latency file {}", path.display()))?;
        write_latency_trace(BufWriter::new(file), values)
            .with_context(|| format!("Failed to write latency file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterSnapshot;
    use crate::stop::StopCondition;

    fn config() -> BenchmarkConfig {
        BenchmarkConfig::new(vec!["t".into()], StopCondition::MessageCount(100))
    }

    fn outcome(latencies: Vec<LatencySample>) -> RunOutcome {
        let received = latencies.len() as u64;
        RunOutcome {
            elapsed: Duration::from_secs(2),
            counters: CounterSnapshot { sent: received, received },
            latencies,
            topics: Vec::new(),
        }
    }

    #[test]
    fn test_downsample_keeps_every_tenth() {
        let values: Vec<u32> = (0..100).collect();
        let kept: Vec<u32> = downsample(&values, 10).collect();
        assert_eq!(kept, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);

        assert_eq!(downsample(&values[..11], 10).count(), 2);
        assert_eq!(downsample::<u32>(&[], 10).count(), 0);
    }

    #[test]
    fn test_trace_uses_collection_order() {
        // Descending latencies; sorting before sampling would pick 1 ms first.
        let latencies: Vec<_> = (1..=100).rev().map(Duration::from_millis).collect();
        let report = BenchmarkReport::new(&config(), outcome(latencies.clone()), Vec::new());

        assert_eq!(report.latency_trace, trace_of(&latencies));
        assert_eq!(report.latency_trace[0], 100.0);
        assert_eq!(report.latency_trace.len(), 10);
        assert_eq!(report.latency.unwrap().min_ns, 1_000_000);
    }

    #[test]
    fn test_write_latency_trace() {
        let mut out = Vec::new();
        write_latency_trace(&mut out, &[1.5, 0.25, 12.0]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1.5\n0.25\n12.0\n");
    }

    #[test]
    fn test_empty_run_report() {
        let report = BenchmarkReport::new(
            &config(),
            outcome(Vec::new()),
            vec!["-n".into(), "100".into()],
        );

        assert!(report.latency.is_none());
        assert!(report.throughput.is_none());
        assert!(report.latency_trace.is_empty());

        let text = report.to_string();
        assert!(text.contains("No messages received in 2.00s"));
        assert!(!text.contains("P90"));
        assert!(text.ends_with("Commandline arguments: -n 100"));
    }

    #[test]
    fn test_summary_lines() {
        let latencies = (1..=1000).map(Duration::from_millis).collect();
        let text = BenchmarkReport::new(&config(), outcome(latencies), Vec::new()).to_string();

        assert!(text.contains("Message throughput: 500.00 messages/sec"));
        assert!(text.contains("Min latency: 1.000 ms."));
        assert!(text.contains("P90 latency: 901.000 ms."));
        assert!(text.contains("Max latency: 1000.000 ms."));
        assert!(text.contains("Latency StdDev: "));
    }

    #[test]
    fn test_publish_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("latencies.csv");
        let json_path = dir.path().join("results.json");

        let latencies = (0..100).map(|i| Duration::from_micros(i * 100)).collect();
        let report = BenchmarkReport::new(&config(), outcome(latencies), Vec::new());
        ResultsManager::new(Some(trace_path.clone()), Some(json_path.clone()))
            .publish(&report)
            .unwrap();

        let trace = std::fs::read_to_string(&trace_path).unwrap();
        let lines: Vec<&str> = trace.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "0.0");
        assert_eq!(lines[1], "1.0");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["messages_received"], 100);
        assert_eq!(json["latency"]["total_samples"], 100);
        assert_eq!(json["run_id"].as_str().unwrap(), report.run_id);
        assert!(json.get("latency_trace").is_none());
    }

    #[test]
    fn test_empty_run_json_has_null_latency() {
        let report = BenchmarkReport::new(&config(), outcome(Vec::new()), Vec::new());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["latency"].is_null());
    }
}
