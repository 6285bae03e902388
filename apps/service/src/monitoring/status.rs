use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::StatusRecord;

/// Up/down state of a target as it stood before a check was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub is_up: bool,
    pub consecutive_failures: u32,
}

impl Default for StatusSnapshot {
    /// A target that has never been checked is assumed up.
    fn default() -> Self {
        Self { is_up: true, consecutive_failures: 0 }
    }
}

impl StatusSnapshot {
    fn from_record(record: &StatusRecord) -> Self {
        Self { is_up: record.is_up, consecutive_failures: record.consecutive_failures }
    }
}

/// Result of applying one check to a target's status: the flags on both
/// sides of the transition plus the new failure count, so callers can detect
/// crossings without a second read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTransition {
    pub was_up: bool,
    pub is_now_up: bool,
    pub consecutive_failures: u32,
}

/// Pure transition function: failures reset to 0 on success and increment by
/// exactly 1 on failure.
pub fn transition(prev: &StatusSnapshot, is_up: bool) -> CheckTransition {
    CheckTransition {
        was_up: prev.is_up,
        is_now_up: is_up,
        consecutive_failures: if is_up { 0 } else { prev.consecutive_failures + 1 },
    }
}

/// Status tracker - sole owner of `StatusRecord` mutation.
///
/// The scheduler guarantees ticks for one target never overlap, which makes
/// the read-compute-write below atomic per target without locking.
pub struct StatusTracker {
    database: Arc<dyn Database>,
}

impl StatusTracker {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Apply one check outcome and persist the updated record.
    ///
    /// Returns the snapshot as it stood strictly before this call together
    /// with the applied transition; the alert policy uses the former to
    /// detect down-to-up transitions.
    pub async fn record_check(
        &self,
        target_uuid: Uuid,
        is_up: bool,
        status_code: Option<u16>,
        checked_at: DateTime<Utc>,
    ) -> Result<(StatusSnapshot, CheckTransition)> {
        let prior = self.database.get_status(target_uuid).await?;
        let prev = prior.as_ref().map(StatusSnapshot::from_record).unwrap_or_default();
        let applied = transition(&prev, is_up);

        let record = StatusRecord {
            target_uuid,
            is_up,
            consecutive_failures: applied.consecutive_failures,
            last_status_code: status_code,
            last_checked_at: checked_at,
            last_alert_sent_at: prior.and_then(|r| r.last_alert_sent_at),
        };
        self.database.upsert_status(&record).await?;

        Ok((prev, applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The failure count must always equal the length of the trailing run of
    /// failures, for any outcome sequence.
    #[test]
    fn failures_track_trailing_run() {
        let sequences: &[&[bool]] = &[
            &[false, false, true, false],
            &[true, true, true],
            &[false; 12],
            &[true, false, false, true, false, false, false],
        ];

        for outcomes in sequences {
            let mut snapshot = StatusSnapshot::default();
            for (i, &up) in outcomes.iter().enumerate() {
                let applied = transition(&snapshot, up);
                let trailing_failures =
                    outcomes[..=i].iter().rev().take_while(|&&o| !o).count() as u32;
                assert_eq!(applied.consecutive_failures, trailing_failures);
                snapshot = StatusSnapshot {
                    is_up: applied.is_now_up,
                    consecutive_failures: applied.consecutive_failures,
                };
            }
        }
    }

    #[test]
    fn transition_reports_both_sides() {
        let down = StatusSnapshot { is_up: false, consecutive_failures: 4 };
        let applied = transition(&down, true);
        assert!(!applied.was_up);
        assert!(applied.is_now_up);
        assert_eq!(applied.consecutive_failures, 0);
    }

    #[test]
    fn unseen_target_is_assumed_up() {
        let applied = transition(&StatusSnapshot::default(), false);
        assert!(applied.was_up);
        assert_eq!(applied.consecutive_failures, 1);
    }
}
