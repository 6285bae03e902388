/// Engine - wires the persistence layer, probes, sinks and both schedulers
/// together and owns their lifecycle.
///
/// There are no fatal errors below this layer: a malfunctioning target
/// degrades to "always down" and keeps being retried on schedule, and a
/// failing scan or alert delivery never takes the schedulers down.
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::alert::AlertSink;
use crate::database::Database;
use crate::monitoring::{Probe, UptimeScheduler};
use crate::vuln::{ScanReport, VulnSchedule, VulnScheduler, VulnSource};

pub struct Engine {
    database: Arc<dyn Database>,
    uptime: Arc<UptimeScheduler>,
    /// Absent when no vulnerability source is configured; uptime monitoring
    /// runs either way.
    vuln: Option<Arc<VulnScheduler>>,
}

impl Engine {
    pub fn new(
        database: Arc<dyn Database>,
        probe: Arc<dyn Probe>,
        sink: Arc<dyn AlertSink>,
        source: Option<Arc<dyn VulnSource>>,
        schedule: VulnSchedule,
    ) -> Self {
        let uptime =
            Arc::new(UptimeScheduler::new(Arc::clone(&database), probe, Arc::clone(&sink)));
        let vuln = source.map(|source| {
            Arc::new(VulnScheduler::new(Arc::clone(&database), source, sink, schedule))
        });

        Self { database, uptime, vuln }
    }

    /// Schedule every active target and start the daily vulnerability cycle.
    pub async fn start(&self) -> Result<()> {
        let scheduled = self.uptime.schedule_all().await?;
        info!("uptime scheduler started with {} target(s)", scheduled);

        match &self.vuln {
            Some(vuln) => vuln.start_daily().await,
            None => info!("no vulnerability source configured, scans disabled"),
        }

        Ok(())
    }

    /// Pick up a target added by the UI layer and start checking it. Safe
    /// while other targets are running; they are not disturbed.
    pub async fn add_target(&self, target_uuid: Uuid) -> Result<bool> {
        match self.database.get_target(target_uuid).await? {
            Some(target) if target.enabled => {
                self.uptime.schedule(target).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Deactivate a target and cancel its recurring check.
    pub async fn remove_target(&self, target_uuid: Uuid) -> Result<()> {
        self.database.set_target_inactive(target_uuid).await?;
        self.uptime.unschedule(target_uuid).await;
        Ok(())
    }

    /// On-demand vulnerability scan of every active target.
    pub async fn scan_all_now(&self) -> Result<usize> {
        match &self.vuln {
            Some(vuln) => vuln.scan_all().await,
            None => Ok(0),
        }
    }

    /// On-demand vulnerability scan of one target.
    pub async fn scan_target_now(&self, target_uuid: Uuid) -> Result<Option<ScanReport>> {
        match &self.vuln {
            Some(vuln) => vuln.scan_one(target_uuid).await,
            None => Ok(None),
        }
    }

    /// On-demand vulnerability scan of one owning group.
    pub async fn scan_group_now(&self, group_id: &str) -> Result<usize> {
        match &self.vuln {
            Some(vuln) => vuln.scan_group(group_id).await,
            None => Ok(0),
        }
    }

    /// Suppress future vulnerability alerts for the given CVEs on a target.
    pub async fn ignore_cves(
        &self,
        target_uuid: Uuid,
        cve_ids: &[String],
        ignored_by: &str,
    ) -> Result<()> {
        match &self.vuln {
            Some(vuln) => vuln.diff_engine().ignore(target_uuid, cve_ids, ignored_by).await,
            None => Ok(()),
        }
    }

    /// Cancel all recurring work. In-flight ticks may complete; nothing is
    /// rescheduled afterwards.
    pub async fn shutdown(&self) {
        self.uptime.unschedule_all().await;
        if let Some(vuln) = &self.vuln {
            vuln.stop().await;
        }
        info!("engine stopped");
    }
}
