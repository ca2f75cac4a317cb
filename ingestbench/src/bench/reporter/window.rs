use std::{collections::VecDeque, time::Duration};

use crate::bench::counters::CounterSnapshot;

/// Throughput figures computed at one reporting tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// number of samples recorded so far (1-based)
    pub tick: u64,
    /// time since the start of the run
    pub elapsed: Duration,
    /// metrics/sec since the start of the run
    pub all_time: f64,
    /// metrics/sec over the last `k` ticks
    pub recent: f64,
    /// metrics/sec since the previous tick
    pub instant: f64,
    /// successful requests/sec since the start of the run
    pub requests_per_sec: f64,
    pub counters: CounterSnapshot,
    /// last report of the run
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    elapsed: Duration,
    successes: u64,
}

/// Sliding window over the success counter.
///
/// Keeps the `k + 1` most recent samples, the oldest one being
/// the reference for the windowed rate. Until `k + 1` samples are
/// available the initial sample (taken at the start of the run) is used.
#[derive(Debug)]
pub struct ThroughputWindow {
    metrics_per_batch: u64,
    period: Duration,
    capacity: usize,
    samples: VecDeque<Sample>,
    ticks: u64,
}

impl ThroughputWindow {
    pub fn new(metrics_per_batch: u64, k: usize, period: Duration) -> Self {
        let capacity = k.max(1) + 1;
        let mut samples = VecDeque::with_capacity(capacity);
        samples.push_back(Sample {
            elapsed: Duration::ZERO,
            successes: 0,
        });
        Self {
            metrics_per_batch,
            period,
            capacity,
            samples,
            ticks: 0,
        }
    }

    /// Record the counters as observed `elapsed` after the start of the run.
    pub fn record(&mut self, elapsed: Duration, counters: CounterSnapshot) -> ThroughputReport {
        let previous = self.samples.back().copied().unwrap_or(Sample {
            elapsed: Duration::ZERO,
            successes: 0,
        });

        let current = Sample {
            elapsed,
            successes: counters.successes,
        };
        self.samples.push_back(current);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.ticks += 1;

        let oldest = self.samples.front().copied().unwrap_or(current);
        let n = self.metrics_per_batch as f64;

        ThroughputReport {
            tick: self.ticks,
            elapsed,
            all_time: rate(current.successes as f64 * n, elapsed),
            recent: rate(
                current.successes.saturating_sub(oldest.successes) as f64 * n,
                elapsed.saturating_sub(oldest.elapsed),
            ),
            instant: rate(
                current.successes.saturating_sub(previous.successes) as f64 * n,
                self.period,
            ),
            requests_per_sec: rate(current.successes as f64, elapsed),
            counters,
            is_final: false,
        }
    }
}

fn rate(amount: f64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0. { amount / secs } else { 0. }
}
