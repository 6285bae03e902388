use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use uuid::Uuid;

use super::policy::{self, AlertDecision};
use super::probe::Probe;
use super::status::StatusTracker;
use crate::alert::{Alert, AlertSink, TargetRef};
use crate::database::Database;
use crate::database::models::{CheckRecord, Target};

/// Uptime scheduler - one cancellable recurring task per monitored target.
///
/// Targets are independent: a slow check or a failing alert delivery on one
/// target never delays or cancels another's ticks. Ticks for a single target
/// are serialized by running the check inline in its own timer loop; a check
/// that outlasts the interval causes the overlapping tick to be skipped, not
/// queued.
pub struct UptimeScheduler {
    database: Arc<dyn Database>,
    tracker: StatusTracker,
    probe: Arc<dyn Probe>,
    sink: Arc<dyn AlertSink>,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl UptimeScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        probe: Arc<dyn Probe>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let tracker = StatusTracker::new(Arc::clone(&database));
        Self { database, tracker, probe, sink, tasks: Mutex::new(HashMap::new()) }
    }

    /// Schedule every active target. Safe to call on a running scheduler;
    /// already-scheduled targets are restarted.
    pub async fn schedule_all(self: &Arc<Self>) -> Result<usize> {
        let targets = self.database.list_active_targets().await?;
        let count = targets.len();
        for target in targets {
            self.schedule(target).await;
        }
        Ok(count)
    }

    /// Arm (or re-arm) the recurring check for one target. Any existing task
    /// for the same id is cancelled first, so a rescheduled target can never
    /// tick twice per interval.
    pub async fn schedule(self: &Arc<Self>, target: Target) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.remove(&target.uuid) {
            existing.abort();
        }

        info!(
            "scheduling {} ({}) every {}s",
            target.name, target.url, target.interval_seconds
        );

        let scheduler = Arc::clone(self);
        let uuid = target.uuid;
        let handle = tokio::spawn(async move {
            scheduler.run_target(target).await;
        });
        tasks.insert(uuid, handle);
    }

    /// Cancel the recurring check for one target. After this returns no
    /// further ticks fire for it; an in-flight tick may complete but is not
    /// rescheduled.
    pub async fn unschedule(&self, target_uuid: Uuid) -> bool {
        match self.tasks.lock().await.remove(&target_uuid) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every scheduled target.
    pub async fn unschedule_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    pub async fn scheduled_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Per-target loop: one immediate check, then one per interval. The
    /// configuration is re-read after every tick so edits take effect without
    /// an explicit reschedule, and a removed or disabled target stops itself.
    async fn run_target(&self, target: Target) {
        let mut current = target;
        let mut timer = interval(Duration::from_secs(current.interval_seconds.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // First tick completes immediately.
            timer.tick().await;

            if let Err(error) = self.run_check(&current).await {
                warn!("check cycle for {} failed: {error:#}", current.name);
            }

            match self.database.get_target(current.uuid).await {
                Ok(Some(fresh)) if fresh.enabled => {
                    if fresh.interval_seconds != current.interval_seconds {
                        timer = interval(Duration::from_secs(fresh.interval_seconds.max(1)));
                        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        timer.reset();
                    }
                    current = fresh;
                }
                Ok(_) => {
                    info!("target {} removed or disabled, stopping checks", current.name);
                    return;
                }
                Err(error) => {
                    // Keep ticking with the stale configuration.
                    warn!("failed to refresh target {}: {error:#}", current.name);
                }
            }
        }
    }

    /// One tick: probe, record the transition, evaluate the alert policy,
    /// emit at most one alert, append the history row.
    async fn run_check(&self, target: &Target) -> Result<()> {
        let outcome = self.probe.check(&target.url).await;
        let checked_at = Utc::now();

        let (prev, applied) = self
            .tracker
            .record_check(target.uuid, outcome.is_up, outcome.status_code, checked_at)
            .await?;

        let decision =
            policy::evaluate(&prev, outcome.is_up, target.failure_threshold, target.interval_seconds);

        match decision {
            AlertDecision::Down { escalation } => {
                let alert = Alert::Down {
                    target: TargetRef::from_target(target),
                    status_code: outcome.status_code,
                    consecutive_failures: applied.consecutive_failures,
                    escalation,
                    body_excerpt: outcome.body.clone(),
                };
                self.emit(&alert, target.uuid).await;
            }
            AlertDecision::Recovered => {
                let alert = Alert::Recovered {
                    target: TargetRef::from_target(target),
                    failed_checks: prev.consecutive_failures,
                };
                self.emit(&alert, target.uuid).await;
            }
            AlertDecision::None => {}
        }

        self.database
            .append_check(&CheckRecord {
                id: None,
                target_uuid: target.uuid,
                timestamp: checked_at,
                status_code: outcome.status_code,
                is_up: outcome.is_up,
                response_time_ms: outcome.response_time_ms,
            })
            .await?;

        Ok(())
    }

    /// Delivery is at most once, best effort; the alert timestamp is recorded
    /// whether or not delivery succeeded.
    async fn emit(&self, alert: &Alert, target_uuid: Uuid) {
        if let Err(error) = self.sink.send(alert).await {
            warn!("alert delivery failed: {error:#}");
        }
        if let Err(error) = self.database.mark_alert_sent(target_uuid, Utc::now()).await {
            warn!("failed to record alert timestamp: {error:#}");
        }
    }
}
