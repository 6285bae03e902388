use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::vuln::types::{Finding, Severity};

/// Minimum check interval a target may be configured with, in seconds.
pub const MIN_INTERVAL_SECONDS: u64 = 10;

/// Validation failures for target configuration written by the UI layer.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("check interval must be at least {MIN_INTERVAL_SECONDS} seconds, got {0}")]
    IntervalTooShort(u64),

    #[error("failure threshold must be at least 1")]
    ZeroThreshold,

    #[error("target URL is not valid: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Target model - a monitored endpoint plus its check configuration.
///
/// Created and edited by the owning UI collaborator; the engine treats it as
/// read-only configuration and re-reads it on every scheduling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Option<i64>,
    pub uuid: Uuid,
    /// Owning monitoring group (chat server, team, ...); target names are
    /// unique within a group, not globally.
    pub group_id: String,
    pub name: String,
    pub url: String,
    pub interval_seconds: u64,
    /// Consecutive failed checks required before the first DOWN alert.
    pub failure_threshold: u32,
    /// Channel the alert sink should deliver to for this target.
    pub alert_channel: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    pub fn new(group_id: String, name: String, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            group_id,
            name,
            url,
            interval_seconds: 60,
            failure_threshold: 3,
            alert_channel: String::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(ValidationError::IntervalTooShort(self.interval_seconds));
        }
        if self.failure_threshold == 0 {
            return Err(ValidationError::ZeroThreshold);
        }
        url::Url::parse(&self.url)?;
        Ok(())
    }
}

/// Current health state for one target, owned exclusively by the status
/// tracker. One row per target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub target_uuid: Uuid,
    pub is_up: bool,
    /// Count of back-to-back failed checks since the last success. Resets to
    /// 0 on any success, increments by exactly 1 on any failure.
    pub consecutive_failures: u32,
    pub last_status_code: Option<u16>,
    pub last_checked_at: DateTime<Utc>,
    pub last_alert_sent_at: Option<DateTime<Utc>>,
}

/// One row of the append-only check history. Never mutated; only consumed by
/// the aggregator and pruned by retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Option<i64>,
    pub target_uuid: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub is_up: bool,
    pub response_time_ms: u64,
}

/// One vulnerability believed present (or historically present) on a target.
///
/// Resolution is a tombstone: `resolved` flips to true and `resolved_at` is
/// set, but the row is never deleted, so "this was fixed" alerts and history
/// queries keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: Option<i64>,
    pub target_uuid: Uuid,
    pub cve_id: String,
    pub technology: String,
    pub version: String,
    pub severity: Severity,
    pub score: f64,
    pub source: String,
    pub description: String,
    pub reference_url: String,
    pub first_seen_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl VulnerabilityRecord {
    /// Build an active record from a fresh scan finding.
    pub fn from_finding(
        target_uuid: Uuid,
        finding: &Finding,
        first_seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            target_uuid,
            cve_id: finding.cve_id.clone(),
            technology: finding.technology.clone(),
            version: finding.version.clone(),
            severity: finding.severity,
            score: finding.score,
            source: finding.source.clone(),
            description: finding.description.clone(),
            reference_url: finding.reference_url.clone(),
            first_seen_at,
            resolved: false,
            resolved_at: None,
        }
    }
}

/// Per-target CVE suppression entry. Affects only future alert-worthiness;
/// the vulnerability itself stays tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreEntry {
    pub target_uuid: Uuid,
    pub cve_id: String,
    pub ignored_by: String,
    pub created_at: DateTime<Utc>,
}

/// Convert a timestamp to epoch milliseconds for storage.
pub fn ts_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp.
pub fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_validation() {
        let mut target =
            Target::new("group".into(), "api".into(), "https://api.example.com".into());
        assert!(target.validate().is_ok());

        target.interval_seconds = 5;
        assert!(matches!(target.validate(), Err(ValidationError::IntervalTooShort(5))));

        target.interval_seconds = 60;
        target.failure_threshold = 0;
        assert!(matches!(target.validate(), Err(ValidationError::ZeroThreshold)));

        target.failure_threshold = 3;
        target.url = "not a url".into();
        assert!(matches!(target.validate(), Err(ValidationError::InvalidUrl(_))));
    }

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        let restored = millis_to_ts(ts_to_millis(now));
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }
}
