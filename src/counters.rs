use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide sent/received message totals.
///
/// One instance is created per run and shared (behind an `Arc`) by every
/// producer and consumer on every topic. Increments are commutative, so
/// relaxed ordering is enough; readers only need an eventually consistent view.
#[derive(Debug, Default)]
pub struct RunCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

/// A point-in-time copy of [`RunCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub sent: u64,
    pub received: u64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent: self.sent(),
            received: self.received(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_are_independent() {
        let counters = RunCounters::new();
        counters.record_sent();
        counters.record_sent();
        counters.record_received();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                sent: 2,
                received: 1
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let counters = Arc::new(RunCounters::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    counters.record_sent();
                    counters.record_received();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counters.sent(), 8000);
        assert_eq!(counters.received(), 8000);
    }
}
