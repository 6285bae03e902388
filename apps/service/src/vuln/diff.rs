use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{Finding, Severity};
use crate::database::Database;
use crate::database::models::{Target, VulnerabilityRecord};

/// Classified result of diffing one fresh scan against the CVE store.
///
/// The alert subsets already exclude ignored CVEs. Note the deliberate
/// asymmetry: `all_critical` contains every currently-active CRITICAL
/// finding, new or pre-existing, so CRITICAL issues re-alert on every scan
/// until fixed, whereas HIGH issues appear only in `new_high` on first
/// discovery.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Findings not previously active; persisted as new records.
    pub new_findings: Vec<Finding>,
    /// Previously-active records absent from this scan; tombstoned.
    pub resolved: Vec<VulnerabilityRecord>,
    pub new_high: Vec<Finding>,
    pub new_critical: Vec<Finding>,
    pub all_critical: Vec<Finding>,
    /// Resolved records whose severity was HIGH or CRITICAL.
    pub resolved_high_plus: Vec<VulnerabilityRecord>,
}

impl ScanReport {
    pub fn should_alert(&self) -> bool {
        !self.new_high.is_empty()
            || !self.all_critical.is_empty()
            || !self.resolved_high_plus.is_empty()
    }
}

/// Vulnerability diff engine - compares fresh scan findings against the CVE
/// store and owns all VulnerabilityRecord/IgnoreEntry mutation.
pub struct DiffEngine {
    database: Arc<dyn Database>,
}

impl DiffEngine {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Diff one scan against the store and persist the outcome: new findings
    /// become active records, vanished ones are tombstoned as resolved.
    ///
    /// Callers must only invoke this with a scan that actually completed; a
    /// failed scan is abandoned upstream so no false "resolved" can be
    /// inferred from it.
    pub async fn process_scan(
        &self,
        target: &Target,
        findings: &[Finding],
        now: DateTime<Utc>,
    ) -> Result<ScanReport> {
        let active = self.database.active_vulnerabilities(target.uuid).await?;
        let ignored = self.database.ignored_cves(target.uuid).await?;

        let active_ids: HashSet<&str> = active.iter().map(|r| r.cve_id.as_str()).collect();
        let fresh_ids: HashSet<&str> = findings.iter().map(|f| f.cve_id.as_str()).collect();

        // A scan may report the same CVE once per affected technology; the
        // store is keyed by (target, cve), so keep the first occurrence.
        let mut seen = HashSet::new();
        let deduped: Vec<&Finding> =
            findings.iter().filter(|f| seen.insert(f.cve_id.as_str())).collect();

        let new_findings: Vec<Finding> = deduped
            .iter()
            .filter(|f| !active_ids.contains(f.cve_id.as_str()))
            .map(|f| (*f).clone())
            .collect();
        let resolved: Vec<VulnerabilityRecord> = active
            .iter()
            .filter(|r| !fresh_ids.contains(r.cve_id.as_str()))
            .cloned()
            .collect();

        for finding in &new_findings {
            let record = VulnerabilityRecord::from_finding(target.uuid, finding, now);
            self.database.insert_vulnerability(&record).await?;
        }
        for record in &resolved {
            self.database.resolve_vulnerability(target.uuid, &record.cve_id, now).await?;
        }

        let not_ignored = |cve_id: &str| !ignored.contains(cve_id);

        let new_high: Vec<Finding> = new_findings
            .iter()
            .filter(|f| f.severity == Severity::High && not_ignored(&f.cve_id))
            .cloned()
            .collect();
        let new_critical: Vec<Finding> = new_findings
            .iter()
            .filter(|f| f.severity == Severity::Critical && not_ignored(&f.cve_id))
            .cloned()
            .collect();
        let all_critical: Vec<Finding> = deduped
            .iter()
            .filter(|f| f.severity == Severity::Critical && not_ignored(&f.cve_id))
            .map(|f| (*f).clone())
            .collect();
        let resolved_high_plus: Vec<VulnerabilityRecord> = resolved
            .iter()
            .filter(|r| r.severity.is_high_or_worse() && not_ignored(&r.cve_id))
            .cloned()
            .collect();

        if !new_findings.is_empty() || !resolved.is_empty() {
            info!(
                "scan diff for {}: {} new, {} resolved, {} active critical",
                target.name,
                new_findings.len(),
                resolved.len(),
                all_critical.len()
            );
        } else {
            debug!("scan diff for {}: no changes", target.name);
        }

        Ok(ScanReport {
            new_findings,
            resolved,
            new_high,
            new_critical,
            all_critical,
            resolved_high_plus,
        })
    }

    /// Suppress future alerting for the given CVEs on one target. Tracking is
    /// unaffected: the records stay active/resolvable as before.
    pub async fn ignore(
        &self,
        target_uuid: Uuid,
        cve_ids: &[String],
        ignored_by: &str,
    ) -> Result<()> {
        self.database.add_ignores(target_uuid, cve_ids, ignored_by).await?;
        info!(
            "ignoring {} CVE(s) on target {} (requested by {})",
            cve_ids.len(),
            target_uuid,
            ignored_by
        );
        Ok(())
    }
}
