//! # Statistics Engine
//!
//! Turns the pooled latency samples of a run into the numbers the report
//! prints: min, P90, P99, P99.9, max, mean, sample standard deviation and
//! standard error, plus message and byte throughput.
//!
//! ## Percentile indices
//!
//! Percentiles are read straight out of the sorted samples at
//! `N - N/10`, `N - N/100` and `N - N/1000`. This is an approximation that
//! favours the tail: for small `N` the integer division rounds to zero and
//! the index collapses onto the maximum. Indices are clamped to `N - 1`, so
//! for `N < 10` every percentile reports the maximum.
//!
//! ## Warm-up trimming
//!
//! Each topic's samples lose their first and last 10% before pooling. Early
//! samples carry connection-setup delay; late ones thin out as producers
//! finish at different times.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One end-to-end latency measurement.
pub type LatencySample = Duration;

/// Fraction of a topic's samples dropped at each end, as a divisor.
pub const WARMUP_TRIM_DIVISOR: usize = 10;

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Drop the first and last `len / 10` samples of one topic's ordered sequence.
///
/// Keeps `M - 2 * floor(M / 10)` samples; topics with fewer than ten samples
/// are kept whole.
pub fn trim_warmup(samples: &[LatencySample]) -> &[LatencySample] {
    let cut = samples.len() / WARMUP_TRIM_DIVISOR;
    &samples[cut..samples.len() - cut]
}

/// Index of the percentile selected by `divisor` (10 → P90, 100 → P99, ...)
/// in a sorted sequence of `len` samples. `len` must be at least 1.
pub fn percentile_index(len: usize, divisor: usize) -> usize {
    debug_assert!(len > 0, "percentile of an empty sequence");
    (len - len / divisor).min(len.saturating_sub(1))
}

/// Convert a latency to fractional milliseconds.
pub fn to_millis(latency: LatencySample) -> f64 {
    latency.as_nanos() as f64 / NANOS_PER_MILLI
}

/// Latency distribution of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub total_samples: usize,
    pub min_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub max_ns: u64,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub std_err_ms: f64,
}

impl LatencyMetrics {
    /// Sort `latencies` in place and compute the distribution.
    ///
    /// Returns `None` for an empty run; nothing is indexed in that case.
    pub fn compute(latencies: &mut [LatencySample]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        latencies.sort_unstable();
        let n = latencies.len();
        let at = |index: usize| latencies[index].as_nanos() as u64;

        let (mean_ms, std_dev_ms) =
            mean_and_sample_std_dev(latencies.iter().map(|l| to_millis(*l)));
        let std_err_ms = std_dev_ms / (n as f64).sqrt();

        Some(Self {
            total_samples: n,
            min_ns: at(0),
            p90_ns: at(percentile_index(n, 10)),
            p99_ns: at(percentile_index(n, 100)),
            p999_ns: at(percentile_index(n, 1000)),
            max_ns: at(n - 1),
            mean_ms,
            std_dev_ms,
            std_err_ms,
        })
    }
}

/// Mean and unbiased (n - 1) standard deviation. The deviation of fewer than
/// two values is reported as zero.
fn mean_and_sample_std_dev(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (count, sum) = values
        .clone()
        .fold((0usize, 0.0f64), |(count, sum), v| (count + 1, sum + v));
    if count == 0 {
        return (0.0, 0.0);
    }

    let mean = sum / count as f64;
    if count < 2 {
        return (mean, 0.0);
    }

    let squares: f64 = values.map(|v| (v - mean).powi(2)).sum();
    (mean, (squares / (count - 1) as f64).sqrt())
}

/// Message and data rate over the run's wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub total_messages: u64,
    pub total_bytes: u64,
    pub duration_ns: u64,
    pub messages_per_second: f64,
    /// Binary megabytes (2^20 bytes) per second.
    pub megabytes_per_second: f64,
}

impl ThroughputMetrics {
    pub fn new(messages: u64, message_size: usize, elapsed: Duration) -> Self {
        let total_bytes = messages.saturating_mul(message_size as u64);
        let duration_secs = elapsed.as_secs_f64();

        let (messages_per_second, megabytes_per_second) = if duration_secs > 0.0 {
            (
                messages as f64 / duration_secs,
                total_bytes as f64 / duration_secs / BYTES_PER_MEGABYTE,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            total_messages: messages,
            total_bytes,
            duration_ns: elapsed.as_nanos() as u64,
            messages_per_second,
            megabytes_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(values: &[u64]) -> Vec<LatencySample> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_trim_removes_first_and_last_decile() {
        for m in [0usize, 1, 9, 10, 19, 20, 105, 1000] {
            let samples = vec![Duration::from_millis(1); m];
            assert_eq!(trim_warmup(&samples).len(), m - 2 * (m / 10), "M = {}", m);
        }

        let samples = millis(&(0..20).collect::<Vec<_>>());
        assert_eq!(trim_warmup(&samples), &samples[2..18]);
    }

    #[test]
    fn test_percentile_indices_are_ordered_and_in_bounds() {
        for n in (1..=2500).chain([10_000, 123_457]) {
            let p90 = percentile_index(n, 10);
            let p99 = percentile_index(n, 100);
            let p999 = percentile_index(n, 1000);
            assert!(p90 <= p99 && p99 <= p999 && p999 <= n - 1, "N = {}", n);
        }
        assert_eq!(percentile_index(1000, 10), 900);
        assert_eq!(percentile_index(1000, 100), 990);
        assert_eq!(percentile_index(1000, 1000), 999);
    }

    #[test]
    fn test_small_samples_collapse_to_max() {
        assert_eq!(percentile_index(1, 10), 0);
        assert_eq!(percentile_index(5, 10), 4);
        assert_eq!(percentile_index(50, 100), 49);
    }

    #[test]
    fn test_empty_run_has_no_statistics() {
        assert!(LatencyMetrics::compute(&mut []).is_none());
    }

    #[test]
    fn test_compute_sorts_and_reads_percentiles() {
        // 1000 samples of 1..=1000 ms, shuffled by reversing.
        let mut latencies = millis(&(1..=1000).rev().collect::<Vec<_>>());
        let stats = LatencyMetrics::compute(&mut latencies).unwrap();

        assert!(latencies.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stats.total_samples, 1000);
        assert_eq!(stats.min_ns, 1_000_000);
        assert_eq!(stats.p90_ns, 901_000_000);
        assert_eq!(stats.p99_ns, 991_000_000);
        assert_eq!(stats.p999_ns, 1_000_000_000);
        assert_eq!(stats.max_ns, 1_000_000_000);
        assert!((stats.mean_ms - 500.5).abs() < 1e-9);
    }

    #[test]
    fn test_sample_standard_deviation() {
        let mut latencies = millis(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let stats = LatencyMetrics::compute(&mut latencies).unwrap();

        // Sample variance of this set is 32 / 7.
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((stats.std_dev_ms - expected).abs() < 1e-9);
        assert!((stats.std_err_ms - expected / 8f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample() {
        let mut latencies = millis(&[3]);
        let stats = LatencyMetrics::compute(&mut latencies).unwrap();

        assert_eq!(stats.min_ns, stats.max_ns);
        assert_eq!(stats.p999_ns, 3_000_000);
        assert_eq!(stats.std_dev_ms, 0.0);
        assert_eq!(stats.std_err_ms, 0.0);
    }

    #[test]
    fn test_throughput() {
        let metrics = ThroughputMetrics::new(2048, 512, Duration::from_secs(2));
        assert_eq!(metrics.total_bytes, 1_048_576);
        assert_eq!(metrics.messages_per_second, 1024.0);
        assert_eq!(metrics.megabytes_per_second, 0.5);

        let idle = ThroughputMetrics::new(10, 128, Duration::ZERO);
        assert_eq!(idle.messages_per_second, 0.0);
    }

    #[test]
    fn test_to_millis() {
        assert_eq!(to_millis(Duration::from_micros(1500)), 1.5);
    }
}
