//! Bucketed rolling window of call outcomes.
//!
//! The window spans `rolling_count_timeout` and is split into
//! `rolling_count_buckets` equal slots. A bucket is picked by wall-clock slot
//! number and zeroed lazily when a write lands in a slot it no longer holds.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Absolute slot number this bucket currently holds.
    slot: u64,
    successes: u64,
    failures: u64,
}

/// Aggregate counts over the live part of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowTotals {
    pub successes: u64,
    pub failures: u64,
}

impl WindowTotals {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure rate in percent; 0 for an empty window.
    pub fn failure_percentage(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failures as f64 * 100.0 / total as f64,
        }
    }
}

/// Fixed ring of outcome buckets.
#[derive(Debug)]
pub struct RollingWindow {
    origin: Instant,
    bucket_width_ms: u64,
    buckets: Vec<Bucket>,
}

impl RollingWindow {
    pub fn new(span: Duration, bucket_count: u32, origin: Instant) -> Self {
        let bucket_count = bucket_count.max(1);
        let bucket_width_ms = (span.as_millis() as u64 / u64::from(bucket_count)).max(1);
        Self {
            origin,
            bucket_width_ms,
            buckets: vec![Bucket::default(); bucket_count as usize],
        }
    }

    fn slot(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_millis() as u64 / self.bucket_width_ms
    }

    /// Record one outcome at `now`.
    pub fn record(&mut self, now: Instant, success: bool) {
        let slot = self.slot(now);
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(slot % len) as usize];
        if bucket.slot != slot {
            *bucket = Bucket {
                slot,
                successes: 0,
                failures: 0,
            };
        }
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    /// Sum of buckets that still fall inside the window at `now`.
    pub fn totals(&self, now: Instant) -> WindowTotals {
        let current = self.slot(now);
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.slot <= current && b.slot + len > current)
            .fold(WindowTotals::default(), |acc, b| WindowTotals {
                successes: acc.successes + b.successes,
                failures: acc.failures + b.failures,
            })
    }

    pub fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}
