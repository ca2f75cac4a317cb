use std::time::Duration;

/// Synthetic collection times for a single batch chain.
///
/// Starts at `now - duration` and advances by a fixed interval
/// for as long as the timestamp is still in the past (`t < now`),
/// which yields `ceil(duration / interval)` timestamps in total.
///
/// All values are milliseconds since the unix epoch, as this is
/// the only time unit the ingestion endpoint understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampSequence {
    next: i64,
    end: i64,
    interval: i64,
}

impl TimestampSequence {
    /// Create a new sequence ending at `now_ms`.
    ///
    /// A zero interval is treated as one millisecond,
    /// the sequence would otherwise never end.
    pub fn new(now_ms: i64, duration: Duration, interval: Duration) -> Self {
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let interval_ms = i64::try_from(interval.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);

        Self {
            next: now_ms.saturating_sub(duration_ms),
            end: now_ms,
            interval: interval_ms,
        }
    }

    /// First timestamp of the sequence, even if the sequence is empty.
    pub fn start(&self) -> i64 {
        self.next
    }

    fn remaining(&self) -> usize {
        if self.next >= self.end {
            return 0;
        }
        let span = (self.end - self.next) as u64;
        let interval = self.interval as u64;
        span.div_ceil(interval) as usize
    }
}

impl Iterator for TimestampSequence {
    type Item = i64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let ts = self.next;
        self.next = self.next.saturating_add(self.interval);
        Some(ts)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for TimestampSequence {}
