//! Read-only bucketing of check history for reporting.
//!
//! Pure and idempotent: safe to call repeatedly for different reporting
//! windows, no state transitions, no side effects. Alerting never looks at
//! this data.

use chrono::{DateTime, Utc};

use crate::database::models::CheckRecord;

/// Counts for one fixed-width slice of the reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    pub checks: u64,
    pub up_count: u64,
}

/// Derived classification of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketHealth {
    NoData,
    Up,
    Partial,
    Down,
}

impl Bucket {
    pub fn health(&self) -> BucketHealth {
        if self.checks == 0 {
            BucketHealth::NoData
        } else if self.up_count == self.checks {
            BucketHealth::Up
        } else if self.up_count as f64 / self.checks as f64 >= 0.5 {
            BucketHealth::Partial
        } else {
            BucketHealth::Down
        }
    }
}

/// Divide `[window_start, window_end)` into `bucket_count` equal-width
/// intervals and accumulate each record into the bucket containing its
/// timestamp. Records outside the window are discarded.
pub fn bucket_checks(
    records: &[CheckRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    bucket_count: usize,
) -> Vec<Bucket> {
    if bucket_count == 0 || window_end <= window_start {
        return Vec::new();
    }

    let window_ms = (window_end - window_start).num_milliseconds() as i128;
    let mut buckets = vec![Bucket::default(); bucket_count];

    for record in records {
        if record.timestamp < window_start || record.timestamp >= window_end {
            continue;
        }
        let offset_ms = (record.timestamp - window_start).num_milliseconds() as i128;
        let index =
            ((offset_ms * bucket_count as i128) / window_ms).min(bucket_count as i128 - 1) as usize;

        buckets[index].checks += 1;
        if record.is_up {
            buckets[index].up_count += 1;
        }
    }

    buckets
}

/// Fraction of in-window checks that were up, or `None` for an empty window.
pub fn uptime_ratio(
    records: &[CheckRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Option<f64> {
    let mut checks = 0u64;
    let mut up = 0u64;
    for record in records {
        if record.timestamp < window_start || record.timestamp >= window_end {
            continue;
        }
        checks += 1;
        if record.is_up {
            up += 1;
        }
    }

    (checks > 0).then(|| up as f64 / checks as f64)
}
