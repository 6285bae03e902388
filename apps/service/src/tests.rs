/// Integration tests for the engine components.
///
/// These run against a real temp-file database and mock probe / alert sink /
/// vulnerability source implementations, so they exercise the same paths as
/// production without touching the network.
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::alert::{Alert, AlertSink};
use crate::database::models::{CheckRecord, Target};
use crate::database::{Database, DatabaseImpl};
use crate::monitoring::probe::{Probe, ProbeOutcome};
use crate::monitoring::{StatusTracker, UptimeScheduler};
use crate::pool::{StoreManager, StorePool};
use crate::vuln::diff::DiffEngine;
use crate::vuln::types::{Finding, Severity};
use crate::vuln::{VulnSchedule, VulnScheduler, VulnSource};

/// Helper to create a migrated database over a temp file. The TempDir must
/// stay alive for the duration of the test.
async fn test_database() -> Result<(Arc<DatabaseImpl>, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("test.db");

    let db = libsql::Builder::new_local(&db_path).build().await?;
    let pool: StorePool = deadpool::managed::Pool::builder(StoreManager::new(db)).build()?;

    {
        let conn = pool.get().await?;
        crate::database::initialize_database(&conn).await?;
    }

    Ok((Arc::new(DatabaseImpl::new(pool)), temp_dir))
}

fn test_target(interval_seconds: u64, failure_threshold: u32) -> Target {
    let mut target = Target::new(
        "group-1".to_string(),
        "api".to_string(),
        "https://api.example.com/health".to_string(),
    );
    target.interval_seconds = interval_seconds;
    target.failure_threshold = failure_threshold;
    target
}

fn finding(cve_id: &str, severity: Severity) -> Finding {
    Finding {
        cve_id: cve_id.to_string(),
        technology: "nginx".to_string(),
        version: "1.18.0".to_string(),
        severity,
        score: match severity {
            Severity::Critical => 9.8,
            Severity::High => 7.5,
            _ => 4.0,
        },
        source: "test-source".to_string(),
        description: String::new(),
        reference_url: String::new(),
    }
}

/// Probe that replays a scripted list of outcomes, then keeps returning the
/// last one.
struct ScriptedProbe {
    outcomes: Mutex<Vec<ProbeOutcome>>,
}

impl ScriptedProbe {
    fn new(outcomes: Vec<ProbeOutcome>) -> Self {
        Self { outcomes: Mutex::new(outcomes) }
    }

    fn up() -> ProbeOutcome {
        ProbeOutcome { is_up: true, status_code: Some(200), response_time_ms: 12, body: None }
    }

    fn down(status_code: Option<u16>) -> ProbeOutcome {
        ProbeOutcome {
            is_up: false,
            status_code,
            response_time_ms: 40,
            body: status_code.map(|_| "service unavailable".to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, _url: &str) -> ProbeOutcome {
        let mut outcomes = self.outcomes.lock().await;
        if outcomes.len() > 1 { outcomes.remove(0) } else { outcomes[0].clone() }
    }
}

/// Sink that records every alert it is handed.
#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait::async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

/// Source with per-URL canned findings; unknown URLs fail the scan.
struct CannedSource {
    findings: HashMap<String, Vec<Finding>>,
}

#[async_trait::async_trait]
impl VulnSource for CannedSource {
    async fn scan(&self, url: &str) -> Result<Vec<Finding>> {
        self.findings
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("fingerprinting failed for {url}"))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[tokio::test]
async fn target_round_trip_and_deactivation() -> Result<()> {
    let (database, _dir) = test_database().await?;

    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let loaded = database.get_target(target.uuid).await?.expect("target should exist");
    assert_eq!(loaded.url, target.url);
    assert_eq!(loaded.failure_threshold, 3);

    assert_eq!(database.list_active_targets().await?.len(), 1);
    assert_eq!(database.list_group_targets("group-1").await?.len(), 1);
    assert!(database.list_group_targets("other-group").await?.is_empty());

    database.set_target_inactive(target.uuid).await?;
    assert!(database.list_active_targets().await?.is_empty());
    // Still readable by id, just inactive.
    assert!(!database.get_target(target.uuid).await?.expect("still present").enabled);

    Ok(())
}

#[tokio::test]
async fn invalid_targets_are_rejected_on_save() -> Result<()> {
    let (database, _dir) = test_database().await?;

    let mut target = test_target(5, 3);
    assert!(database.save_target(&target).await.is_err());

    target.interval_seconds = 60;
    target.failure_threshold = 0;
    assert!(database.save_target(&target).await.is_err());

    Ok(())
}

#[tokio::test]
async fn check_history_is_appended_and_pruned() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let now = Utc::now();
    for i in 0..5 {
        database
            .append_check(&CheckRecord {
                id: None,
                target_uuid: target.uuid,
                timestamp: now - chrono::Duration::minutes(i),
                status_code: Some(200),
                is_up: true,
                response_time_ms: 20,
            })
            .await?;
    }

    let window_start = now - chrono::Duration::minutes(2);
    let in_window = database
        .checks_between(target.uuid, window_start, now + chrono::Duration::seconds(1))
        .await?;
    assert_eq!(in_window.len(), 3);

    let deleted = database.delete_checks_before(window_start).await?;
    assert_eq!(deleted, 2);

    Ok(())
}

// ---------------------------------------------------------------------------
// Status tracker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_tracker_counts_and_resets_failures() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let tracker = StatusTracker::new(database.clone() as Arc<dyn Database>);

    let (prev, applied) =
        tracker.record_check(target.uuid, false, Some(502), Utc::now()).await?;
    assert!(prev.is_up);
    assert_eq!(applied.consecutive_failures, 1);

    let (_, applied) = tracker.record_check(target.uuid, false, None, Utc::now()).await?;
    assert_eq!(applied.consecutive_failures, 2);

    let (prev, applied) = tracker.record_check(target.uuid, true, Some(200), Utc::now()).await?;
    assert!(!prev.is_up);
    assert_eq!(prev.consecutive_failures, 2);
    assert_eq!(applied.consecutive_failures, 0);

    let status = database.get_status(target.uuid).await?.expect("status row exists");
    assert!(status.is_up);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_status_code, Some(200));

    Ok(())
}

// ---------------------------------------------------------------------------
// Uptime scheduler
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scheduler_runs_the_full_alert_pipeline() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 2);
    database.save_target(&target).await?;

    let probe = Arc::new(ScriptedProbe::new(vec![
        ScriptedProbe::down(Some(503)),
        ScriptedProbe::down(Some(503)),
        ScriptedProbe::up(),
    ]));
    let sink = Arc::new(RecordingSink::default());

    let scheduler = Arc::new(UptimeScheduler::new(
        database.clone() as Arc<dyn Database>,
        probe,
        sink.clone() as Arc<dyn AlertSink>,
    ));
    scheduler.schedule(target.clone()).await;
    assert_eq!(scheduler.scheduled_count().await, 1);

    // Immediate check, then two more interval ticks.
    tokio::time::sleep(Duration::from_secs(125)).await;

    let alerts = sink.alerts.lock().await.clone();
    assert_eq!(alerts.len(), 2, "expected DOWN then RECOVERED, got {alerts:?}");
    assert!(matches!(
        alerts[0],
        Alert::Down { escalation: false, consecutive_failures: 2, .. }
    ));
    assert!(matches!(alerts[1], Alert::Recovered { failed_checks: 2, .. }));

    let history = database
        .checks_between(
            target.uuid,
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        )
        .await?;
    assert_eq!(history.len(), 3);

    assert!(scheduler.unschedule(target.uuid).await);
    assert!(!scheduler.unschedule(target.uuid).await);

    // No further ticks after cancellation.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(sink.alerts.lock().await.len(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rescheduling_replaces_the_existing_task() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let probe = Arc::new(ScriptedProbe::new(vec![ScriptedProbe::up()]));
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(UptimeScheduler::new(
        database.clone() as Arc<dyn Database>,
        probe,
        sink as Arc<dyn AlertSink>,
    ));

    scheduler.schedule(target.clone()).await;
    scheduler.schedule(target.clone()).await;
    assert_eq!(scheduler.scheduled_count().await, 1);

    scheduler.unschedule_all().await;
    assert_eq!(scheduler.scheduled_count().await, 0);

    Ok(())
}

// ---------------------------------------------------------------------------
// Vulnerability diff engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn diff_classifies_new_resolved_and_critical() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let diff = DiffEngine::new(database.clone() as Arc<dyn Database>);

    // First scan: one HIGH, one CRITICAL, one LOW.
    let scan = vec![
        finding("CVE-2024-1111", Severity::High),
        finding("CVE-2024-2222", Severity::Critical),
        finding("CVE-2024-3333", Severity::Low),
    ];
    let report = diff.process_scan(&target, &scan, Utc::now()).await?;

    assert_eq!(report.new_findings.len(), 3);
    assert_eq!(report.new_high.len(), 1);
    assert_eq!(report.new_critical.len(), 1);
    assert_eq!(report.all_critical.len(), 1);
    assert!(report.resolved.is_empty());
    assert!(report.should_alert());

    // Second scan, identical findings: idempotent on the store, HIGH stays
    // quiet, CRITICAL re-alerts.
    let report = diff.process_scan(&target, &scan, Utc::now()).await?;
    assert!(report.new_findings.is_empty());
    assert!(report.new_high.is_empty());
    assert_eq!(report.all_critical.len(), 1);
    assert!(report.should_alert());
    assert_eq!(database.active_vulnerabilities(target.uuid).await?.len(), 3);

    // Third scan: the HIGH disappeared.
    let scan = vec![
        finding("CVE-2024-2222", Severity::Critical),
        finding("CVE-2024-3333", Severity::Low),
    ];
    let report = diff.process_scan(&target, &scan, Utc::now()).await?;
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved_high_plus.len(), 1);
    assert_eq!(report.resolved_high_plus[0].cve_id, "CVE-2024-1111");

    // The tombstone is out of the active set but not deleted: a fourth scan
    // reports no resolution a second time.
    assert_eq!(database.active_vulnerabilities(target.uuid).await?.len(), 2);
    let report = diff.process_scan(&target, &scan, Utc::now()).await?;
    assert!(report.resolved.is_empty());
    assert!(report.resolved_high_plus.is_empty());

    Ok(())
}

#[tokio::test]
async fn duplicate_cves_in_one_scan_collapse() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let diff = DiffEngine::new(database.clone() as Arc<dyn Database>);

    // Same CVE reported for two technologies.
    let mut second = finding("CVE-2024-1111", Severity::Critical);
    second.technology = "openssl".to_string();
    let scan = vec![finding("CVE-2024-1111", Severity::Critical), second];

    let report = diff.process_scan(&target, &scan, Utc::now()).await?;
    assert_eq!(report.new_findings.len(), 1);
    assert_eq!(report.all_critical.len(), 1);
    assert_eq!(database.active_vulnerabilities(target.uuid).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn ignored_cves_are_suppressed_but_still_tracked() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    let other = test_target(60, 3);
    database.save_target(&target).await?;
    database.save_target(&other).await?;

    let diff = DiffEngine::new(database.clone() as Arc<dyn Database>);
    diff.ignore(target.uuid, &["CVE-2024-2222".to_string()], "alice").await?;

    let scan = vec![finding("CVE-2024-2222", Severity::Critical)];
    let report = diff.process_scan(&target, &scan, Utc::now()).await?;

    // Out of every alert subset, but still tracked as active.
    assert!(report.all_critical.is_empty());
    assert!(report.new_critical.is_empty());
    assert!(!report.should_alert());
    assert_eq!(report.new_findings.len(), 1);
    assert_eq!(database.active_vulnerabilities(target.uuid).await?.len(), 1);

    // The ignore is scoped to one target.
    let report = diff.process_scan(&other, &scan, Utc::now()).await?;
    assert_eq!(report.all_critical.len(), 1);
    assert!(report.should_alert());

    Ok(())
}

#[tokio::test]
async fn resolved_ignored_cves_do_not_alert() -> Result<()> {
    let (database, _dir) = test_database().await?;
    let target = test_target(60, 3);
    database.save_target(&target).await?;

    let diff = DiffEngine::new(database.clone() as Arc<dyn Database>);
    diff.process_scan(&target, &[finding("CVE-2024-1111", Severity::High)], Utc::now()).await?;
    diff.ignore(target.uuid, &["CVE-2024-1111".to_string()], "alice").await?;

    let report = diff.process_scan(&target, &[], Utc::now()).await?;
    assert_eq!(report.resolved.len(), 1);
    assert!(report.resolved_high_plus.is_empty());
    assert!(!report.should_alert());

    Ok(())
}

// ---------------------------------------------------------------------------
// Vulnerability scheduler
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_scans_are_skipped_without_touching_records() -> Result<()> {
    let (database, _dir) = test_database().await?;

    let mut healthy = test_target(60, 3);
    healthy.name = "healthy".to_string();
    healthy.url = "https://healthy.example.com".to_string();
    let mut broken = test_target(60, 3);
    broken.name = "broken".to_string();
    broken.url = "https://broken.example.com".to_string();
    database.save_target(&broken).await?;
    database.save_target(&healthy).await?;

    let diff = DiffEngine::new(database.clone() as Arc<dyn Database>);
    // The broken target already has an active finding on record.
    diff.process_scan(&broken, &[finding("CVE-2024-9999", Severity::High)], Utc::now()).await?;

    let source = Arc::new(CannedSource {
        findings: HashMap::from([(
            healthy.url.clone(),
            vec![finding("CVE-2024-1111", Severity::Critical)],
        )]),
    });
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(VulnScheduler::new(
        database.clone() as Arc<dyn Database>,
        source as Arc<dyn VulnSource>,
        sink.clone() as Arc<dyn AlertSink>,
        VulnSchedule::default(),
    ));

    let scanned = scheduler.scan_all().await?;
    assert_eq!(scanned, 1, "the failing target is skipped, the batch continues");

    // No false "resolved" for the target whose scan failed.
    let active = database.active_vulnerabilities(broken.uuid).await?;
    assert_eq!(active.len(), 1);
    assert!(!active[0].resolved);

    // The healthy target's critical finding alerted.
    let alerts = sink.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert!(matches!(&alerts[0], Alert::VulnNew { active_critical, .. } if active_critical.len() == 1));

    Ok(())
}

#[tokio::test]
async fn on_demand_group_scan_only_touches_that_group() -> Result<()> {
    let (database, _dir) = test_database().await?;

    let mut ours = test_target(60, 3);
    ours.url = "https://ours.example.com".to_string();
    let mut theirs = test_target(60, 3);
    theirs.group_id = "group-2".to_string();
    theirs.url = "https://theirs.example.com".to_string();
    database.save_target(&ours).await?;
    database.save_target(&theirs).await?;

    let source = Arc::new(CannedSource {
        findings: HashMap::from([
            (ours.url.clone(), Vec::new()),
            (theirs.url.clone(), Vec::new()),
        ]),
    });
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(VulnScheduler::new(
        database.clone() as Arc<dyn Database>,
        source as Arc<dyn VulnSource>,
        sink as Arc<dyn AlertSink>,
        VulnSchedule::default(),
    ));

    assert_eq!(scheduler.scan_group("group-1").await?, 1);
    assert!(scheduler.scan_one(theirs.uuid).await?.is_some());
    assert!(scheduler.scan_one(Uuid::new_v4()).await?.is_none());

    Ok(())
}
