//! Two-stage uptime alert policy.
//!
//! A single blip must not page anyone, a service stuck down for a long time
//! deserves one reminder, and a recovery is only newsworthy if the outage was
//! severe enough to have alerted in the first place. All decisions here are
//! pure functions of the previous status snapshot, the current check outcome
//! and the target configuration.

use super::status::StatusSnapshot;

/// Continued failure past the first alert escalates after roughly this much
/// time, expressed in whole check cycles.
pub const ESCALATION_WINDOW_SECONDS: u64 = 1800;

/// What, if anything, to emit for one evaluated check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    Down { escalation: bool },
    Recovered,
    None,
}

/// Failure count at which the escalation alert fires, or `None` when the
/// interval is so long that no escalation can ever fire.
///
/// With `interval_seconds > 1800` the integer quotient is 0 and the second
/// threshold collapses onto the first; that configuration never escalates.
/// This is an intentional design limit, kept as-is.
pub fn escalation_threshold(failure_threshold: u32, interval_seconds: u64) -> Option<u32> {
    if interval_seconds == 0 {
        return None;
    }
    let extra = (ESCALATION_WINDOW_SECONDS / interval_seconds) as u32;
    (extra > 0).then(|| failure_threshold + extra)
}

/// Evaluate one check against the previous snapshot.
///
/// Threshold checks are equality tests against the exact crossing count, not
/// `>=`, so each alert fires exactly once per crossing even if the same state
/// is evaluated repeatedly. Callers must record the alert timestamp whenever
/// this returns anything but `None`.
pub fn evaluate(
    prev: &StatusSnapshot,
    is_up: bool,
    failure_threshold: u32,
    interval_seconds: u64,
) -> AlertDecision {
    if !is_up {
        let failures = prev.consecutive_failures + 1;

        if failures == failure_threshold {
            return AlertDecision::Down { escalation: false };
        }
        if escalation_threshold(failure_threshold, interval_seconds) == Some(failures) {
            return AlertDecision::Down { escalation: true };
        }
        return AlertDecision::None;
    }

    // Success. Recovery is only reported when the outage peaked at or above
    // the threshold; the failure count is monotonically non-decreasing
    // between successes, so the previous count is the outage's peak.
    if !prev.is_up && prev.consecutive_failures >= failure_threshold {
        return AlertDecision::Recovered;
    }

    AlertDecision::None
}
