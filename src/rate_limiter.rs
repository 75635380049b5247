//! Per-worker send pacing.
//!
//! Each producer owns its own [`RateLimiter`]; with `P` producers on a topic
//! the topic's aggregate rate is roughly `P × rate`.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Spaces consecutive sends at least `1 / rate` seconds apart.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter for `messages_per_second`. A rate of zero disables pacing.
    pub fn new(messages_per_second: u64) -> Self {
        // Rounded up so that K sends never take less than (K - 1) / rate.
        let interval = if messages_per_second == 0 {
            Duration::ZERO
        } else {
            let nanos = NANOS_PER_SEC / messages_per_second;
            let remainder = NANOS_PER_SEC % messages_per_second;
            Duration::from_nanos(if remainder == 0 { nanos } else { nanos + 1 })
        };

        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Earliest instant at which the next send is allowed, if one was sent before.
    pub fn next_allowed(&self) -> Option<Instant> {
        self.last_sent.map(|last| last + self.interval)
    }

    /// Sleep until the next send is allowed. Returns immediately on the
    /// first call and whenever the deadline already passed.
    ///
    /// The sleep is a tokio timer, so callers can race it against a
    /// cancellation token.
    pub async fn wait(&self) {
        if let Some(deadline) = self.next_allowed() {
            if deadline > Instant::now() {
                sleep_until(deadline).await;
            }
        }
    }

    /// Record the send time of a message the broker acknowledged.
    pub fn record_sent(&mut self, sent_at: Instant) {
        self.last_sent = Some(sent_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_wait_does_not_block() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_consecutive_sends() {
        let rate = 100;
        let sends = 11;
        let mut limiter = RateLimiter::new(rate);
        let start = Instant::now();

        for _ in 0..sends {
            limiter.wait().await;
            limiter.record_sent(Instant::now());
        }

        // (K - 1) / R
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sender_is_not_delayed() {
        let mut limiter = RateLimiter::new(10);
        limiter.record_sent(Instant::now());
        tokio::time::advance(Duration::from_millis(500)).await;

        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_interval_rounds_up() {
        assert_eq!(RateLimiter::new(1000).interval(), Duration::from_millis(1));
        assert_eq!(RateLimiter::new(3).interval(), Duration::from_nanos(333_333_334));
        assert_eq!(RateLimiter::new(u64::MAX).interval(), Duration::from_nanos(1));
    }

    #[test]
    fn test_zero_rate_disables_pacing() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.interval(), Duration::ZERO);
        assert!(limiter.next_allowed().is_none());
    }
}
