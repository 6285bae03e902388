use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::diff::{DiffEngine, ScanReport};
use super::source::VulnSource;
use crate::alert::{Alert, AlertSink, CveSummary, TargetRef};
use crate::database::Database;
use crate::database::models::Target;

/// Timing knobs for the vulnerability scheduler.
#[derive(Debug, Clone)]
pub struct VulnSchedule {
    /// Local wall-clock hour the daily batch starts at.
    pub daily_hour: u32,
    /// Pause between targets in the daily batch. The source is rate limited;
    /// this is deliberate backpressure, not an oversight.
    pub batch_delay: Duration,
    /// Shorter pause for on-demand batches.
    pub on_demand_delay: Duration,
    /// Check-history rows older than this are pruned after each daily batch.
    pub history_retention_days: i64,
}

impl Default for VulnSchedule {
    fn default() -> Self {
        Self {
            daily_hour: 8,
            batch_delay: Duration::from_secs(30),
            on_demand_delay: Duration::from_secs(5),
            history_retention_days: 30,
        }
    }
}

/// Delay from `now` until the next occurrence of `hour:00` local time. If
/// today's occurrence is already past, it is tomorrow's.
pub(crate) fn delay_until_hour(now: NaiveDateTime, hour: u32) -> Duration {
    let Some(today) = now.date().and_hms_opt(hour, 0, 0) else {
        // Unreachable with a validated hour; fall back to a full day.
        return Duration::from_secs(24 * 3600);
    };

    let next = if today > now { today } else { today + ChronoDuration::days(1) };
    (next - now).to_std().unwrap_or_default()
}

/// Vulnerability scheduler - runs the diff engine once per active target per
/// day and on demand.
///
/// Unlike the uptime scheduler, targets are processed strictly sequentially
/// with a fixed inter-target pause, because the fingerprinting source is a
/// rate-limited third-party API. A failed scan is logged and skipped; it
/// never aborts the batch and never touches the target's stored records.
pub struct VulnScheduler {
    database: Arc<dyn Database>,
    source: Arc<dyn VulnSource>,
    diff: DiffEngine,
    sink: Arc<dyn AlertSink>,
    schedule: VulnSchedule,
    daily_task: Mutex<Option<JoinHandle<()>>>,
}

impl VulnScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        source: Arc<dyn VulnSource>,
        sink: Arc<dyn AlertSink>,
        schedule: VulnSchedule,
    ) -> Self {
        let diff = DiffEngine::new(Arc::clone(&database));
        Self { database, source, diff, sink, schedule, daily_task: Mutex::new(None) }
    }

    pub fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    /// Start the daily cycle. The delay to the next start is recomputed after
    /// every batch, so drift and clock changes cannot accumulate.
    pub async fn start_daily(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let delay =
                    delay_until_hour(Local::now().naive_local(), scheduler.schedule.daily_hour);
                info!(
                    "next vulnerability batch at {:02}:00 local, in {}s",
                    scheduler.schedule.daily_hour,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;

                match scheduler.run_batch().await {
                    Ok(scanned) => info!("daily vulnerability batch done, {} targets", scanned),
                    Err(error) => error!("daily vulnerability batch failed: {error:#}"),
                }

                if let Err(error) = scheduler.prune_history().await {
                    warn!("check history pruning failed: {error:#}");
                }
            }
        });

        let mut task = self.daily_task.lock().await;
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the daily cycle. In-flight scans may complete; nothing new starts.
    pub async fn stop(&self) {
        if let Some(handle) = self.daily_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Scan every active target sequentially with the daily pause.
    pub async fn run_batch(&self) -> Result<usize> {
        let targets = self.database.list_active_targets().await?;
        self.run_sequential(&targets, self.schedule.batch_delay).await
    }

    /// On-demand: scan every active target with the short pause.
    pub async fn scan_all(&self) -> Result<usize> {
        let targets = self.database.list_active_targets().await?;
        self.run_sequential(&targets, self.schedule.on_demand_delay).await
    }

    /// On-demand: scan all active targets of one owning group.
    pub async fn scan_group(&self, group_id: &str) -> Result<usize> {
        let targets = self.database.list_group_targets(group_id).await?;
        self.run_sequential(&targets, self.schedule.on_demand_delay).await
    }

    /// On-demand: scan a single target by id.
    pub async fn scan_one(&self, target_uuid: Uuid) -> Result<Option<ScanReport>> {
        match self.database.get_target(target_uuid).await? {
            Some(target) => Ok(Some(self.scan_target(&target).await?)),
            None => Ok(None),
        }
    }

    async fn run_sequential(&self, targets: &[Target], pause: Duration) -> Result<usize> {
        let mut scanned = 0;
        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            match self.scan_target(target).await {
                Ok(_) => scanned += 1,
                Err(error) => {
                    // Abandon this target for the cycle; its stored records
                    // are untouched so no false "resolved" is inferred.
                    warn!("vulnerability scan for {} failed: {error:#}", target.name);
                }
            }
        }
        Ok(scanned)
    }

    /// Scan one target, diff against the store, and emit alerts.
    pub async fn scan_target(&self, target: &Target) -> Result<ScanReport> {
        let findings = self.source.scan(&target.url).await?;
        let report = self.diff.process_scan(target, &findings, Utc::now()).await?;

        if report.should_alert() {
            self.emit_alerts(target, &report).await;
        }

        Ok(report)
    }

    async fn emit_alerts(&self, target: &Target, report: &ScanReport) {
        if !report.new_high.is_empty() || !report.all_critical.is_empty() {
            let alert = Alert::VulnNew {
                target: TargetRef::from_target(target),
                new_high: report.new_high.iter().map(CveSummary::from_finding).collect(),
                active_critical: report
                    .all_critical
                    .iter()
                    .map(CveSummary::from_finding)
                    .collect(),
            };
            if let Err(error) = self.sink.send(&alert).await {
                warn!("vulnerability alert delivery failed: {error:#}");
            }
        }

        if !report.resolved_high_plus.is_empty() {
            let alert = Alert::VulnResolved {
                target: TargetRef::from_target(target),
                resolved: report
                    .resolved_high_plus
                    .iter()
                    .map(CveSummary::from_record)
                    .collect(),
            };
            if let Err(error) = self.sink.send(&alert).await {
                warn!("vulnerability alert delivery failed: {error:#}");
            }
        }
    }

    async fn prune_history(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::days(self.schedule.history_retention_days);
        let deleted = self.database.delete_checks_before(cutoff).await?;
        if deleted > 0 {
            info!("pruned {} check history rows older than {}", deleted, cutoff);
        }
        Ok(())
    }
}
