use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters shared between the dispatcher (writer)
/// and the reporter (reader) of a single benchmark run.
#[derive(Debug, Default)]
pub struct Counters {
    requests_issued: AtomicU64,
    successes: AtomicU64,
}

/// Point-in-time view of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub requests_issued: u64,
    pub successes: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn record_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::AcqRel);
    }

    /// Read both counters.
    ///
    /// `successes` is loaded first: a request is counted as issued
    /// before it can succeed, so the snapshot never reports more
    /// successes than issued requests.
    pub fn snapshot(&self) -> CounterSnapshot {
        let successes = self.successes.load(Ordering::Acquire);
        let requests_issued = self.requests_issued.load(Ordering::Acquire);
        CounterSnapshot {
            requests_issued,
            successes,
        }
    }
}
