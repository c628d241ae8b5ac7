//! Logarithmically bucketed event history.
//!
//! Fifteen buckets cover 1, 2, 4 .. 2^14 minutes. Each bucket keeps a
//! running sum and a sample count, and new events always land in bucket 0.
//! When a minute passes, bucket `i` folds into bucket `i + 1` once its
//! count reaches `2^(i+1)`: the deeper bucket absorbs the sum and gains
//! `2^i` samples, the shallower one keeps half its sum and resets its count
//! to `2^i`. The view divides sum by count per bucket, giving an
//! approximate per-minute rate over exponentially widening windows in
//! constant memory.

use chrono::{DateTime, Utc};

pub const BUCKETS: usize = 15;

/// One point of the rate view: window start and events per minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub at: DateTime<Utc>,
    pub rate: f64,
}

#[derive(Debug, Clone)]
pub struct Timeslice {
    sums: [u64; BUCKETS],
    counts: [u64; BUCKETS],
    /// Minute index (since the Unix epoch) the buckets are aligned to.
    last_minute: i64,
}

fn current_minute() -> i64 {
    Utc::now().timestamp().div_euclid(60)
}

impl Timeslice {
    pub fn new() -> Self {
        Self::starting_at(current_minute())
    }

    pub fn starting_at(minute: i64) -> Self {
        let mut counts = [0u64; BUCKETS];
        for (i, count) in counts.iter_mut().enumerate() {
            *count = 1 << i;
        }
        Self {
            sums: [0; BUCKETS],
            counts,
            last_minute: minute,
        }
    }

    pub fn record(&mut self) {
        self.record_at(current_minute());
    }

    /// Record one event at `minute`. Events older than the last roll are dropped.
    pub fn record_at(&mut self, minute: i64) {
        if self.advance_to(minute) {
            self.sums[0] += 1;
        }
    }

    pub fn view(&mut self) -> Vec<RatePoint> {
        self.view_at(current_minute())
    }

    /// Rate per bucket, newest window first. Brings the buckets up to `minute` first.
    pub fn view_at(&mut self, minute: i64) -> Vec<RatePoint> {
        self.advance_to(minute);

        let base = self.last_minute;
        (0..BUCKETS)
            .map(|i| {
                let start = (base - (1i64 << i)) * 60;
                RatePoint {
                    at: DateTime::from_timestamp(start, 0).unwrap_or_default(),
                    rate: self.sums[i] as f64 / self.counts[i] as f64,
                }
            })
            .collect()
    }

    /// Total events currently represented in the newest bucket.
    pub fn latest_sum(&self) -> u64 {
        self.sums[0]
    }

    fn advance_to(&mut self, minute: i64) -> bool {
        if minute < self.last_minute {
            return false;
        }
        // Bounds the catch-up work after a long idle gap.
        let elapsed = (minute - self.last_minute).min(1 << BUCKETS);
        for _ in 0..elapsed {
            self.roll();
        }
        self.last_minute = minute;
        true
    }

    fn roll(&mut self) {
        self.counts[0] = 2;
        for i in 0..BUCKETS - 1 {
            let limit = 1u64 << (i + 1);
            let reset = 1u64 << i;
            if self.counts[i] < limit {
                break;
            }
            self.sums[i + 1] += self.sums[i];
            self.counts[i + 1] += reset;
            self.counts[i] = reset;
            self.sums[i] >>= 1;
        }
    }
}

impl Default for Timeslice {
    fn default() -> Self {
        Self::new()
    }
}
