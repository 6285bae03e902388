use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::collections::HashSet;
use uuid::Uuid;

use super::models::{
    CheckRecord, StatusRecord, Target, VulnerabilityRecord, millis_to_ts, ts_to_millis,
};
use crate::pool::StorePool;
use crate::vuln::types::Severity;

/// Database trait for abstracting storage operations.
///
/// Covers the Project Registry read surface the engine consumes, the status
/// tracker's single mutable row per target, the append-only check history,
/// and the CVE store with its ignore list.
#[async_trait]
pub trait Database: Send + Sync {
    // Project registry
    async fn list_active_targets(&self) -> Result<Vec<Target>>;
    async fn get_target(&self, uuid: Uuid) -> Result<Option<Target>>;
    async fn list_group_targets(&self, group_id: &str) -> Result<Vec<Target>>;
    async fn save_target(&self, target: &Target) -> Result<i64>;
    async fn set_target_inactive(&self, uuid: Uuid) -> Result<()>;

    // Status tracker
    async fn get_status(&self, target_uuid: Uuid) -> Result<Option<StatusRecord>>;
    async fn upsert_status(&self, record: &StatusRecord) -> Result<()>;
    async fn mark_alert_sent(&self, target_uuid: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Check history
    async fn append_check(&self, record: &CheckRecord) -> Result<i64>;
    async fn checks_between(
        &self,
        target_uuid: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>>;
    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // CVE store
    async fn active_vulnerabilities(&self, target_uuid: Uuid) -> Result<Vec<VulnerabilityRecord>>;
    async fn insert_vulnerability(&self, record: &VulnerabilityRecord) -> Result<i64>;
    async fn resolve_vulnerability(
        &self,
        target_uuid: Uuid,
        cve_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
    async fn ignored_cves(&self, target_uuid: Uuid) -> Result<HashSet<String>>;
    async fn add_ignores(&self, target_uuid: Uuid, cve_ids: &[String], ignored_by: &str)
    -> Result<()>;
}

/// LibSQL database implementation backed by a connection pool.
pub struct DatabaseImpl {
    pool: StorePool,
}

impl DatabaseImpl {
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::StoreManager>> {
        Ok(self.pool.get().await?)
    }
}

fn target_from_row(row: &Row) -> Result<Target> {
    let uuid_str: String = row.get(1)?;
    Ok(Target {
        id: Some(row.get(0)?),
        uuid: Uuid::parse_str(&uuid_str)?,
        group_id: row.get(2)?,
        name: row.get(3)?,
        url: row.get(4)?,
        interval_seconds: row.get::<i64>(5)? as u64,
        failure_threshold: row.get::<i64>(6)? as u32,
        alert_channel: row.get(7)?,
        enabled: row.get::<i64>(8)? != 0,
        created_at: millis_to_ts(row.get(9)?),
        updated_at: millis_to_ts(row.get(10)?),
    })
}

fn vulnerability_from_row(row: &Row) -> Result<VulnerabilityRecord> {
    let uuid_str: String = row.get(1)?;
    let severity_str: String = row.get(5)?;
    Ok(VulnerabilityRecord {
        id: Some(row.get(0)?),
        target_uuid: Uuid::parse_str(&uuid_str)?,
        cve_id: row.get(2)?,
        technology: row.get(3)?,
        version: row.get(4)?,
        severity: Severity::parse_lenient(&severity_str),
        score: row.get(6)?,
        source: row.get(7)?,
        description: row.get(8)?,
        reference_url: row.get(9)?,
        first_seen_at: millis_to_ts(row.get(10)?),
        resolved: row.get::<i64>(11)? != 0,
        resolved_at: row.get::<Option<i64>>(12)?.map(millis_to_ts),
    })
}

const TARGET_COLUMNS: &str = "id, uuid, group_id, name, url, interval_seconds, \
     failure_threshold, alert_channel, enabled, created_at, updated_at";

const VULNERABILITY_COLUMNS: &str = "id, target_uuid, cve_id, technology, version, severity, \
     score, source, description, reference_url, first_seen_at, resolved, resolved_at";

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_active_targets(&self) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE enabled = 1"))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn get_target(&self, uuid: Uuid) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE uuid = ?"))
            .await?;

        let mut rows = stmt.query(params![uuid.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(target_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_group_targets(&self, group_id: &str) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TARGET_COLUMNS} FROM targets WHERE group_id = ? AND enabled = 1"
            ))
            .await?;

        let mut rows = stmt.query(params![group_id]).await?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn save_target(&self, target: &Target) -> Result<i64> {
        target.validate()?;

        let conn = self.get_conn().await?;
        let created_at = ts_to_millis(target.created_at);
        let updated_at = ts_to_millis(target.updated_at);

        if let Some(id) = target.id {
            conn.execute(
                "UPDATE targets SET group_id = ?, name = ?, url = ?, interval_seconds = ?, \
                 failure_threshold = ?, alert_channel = ?, enabled = ?, updated_at = ? WHERE id = ?",
                params![
                    target.group_id.clone(),
                    target.name.clone(),
                    target.url.clone(),
                    target.interval_seconds as i64,
                    target.failure_threshold as i64,
                    target.alert_channel.clone(),
                    if target.enabled { 1 } else { 0 },
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO targets (uuid, group_id, name, url, interval_seconds, \
                 failure_threshold, alert_channel, enabled, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    target.uuid.to_string(),
                    target.group_id.clone(),
                    target.name.clone(),
                    target.url.clone(),
                    target.interval_seconds as i64,
                    target.failure_threshold as i64,
                    target.alert_channel.clone(),
                    if target.enabled { 1 } else { 0 },
                    created_at,
                    updated_at
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn set_target_inactive(&self, uuid: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE targets SET enabled = 0, updated_at = ? WHERE uuid = ?",
            params![Utc::now().timestamp_millis(), uuid.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, target_uuid: Uuid) -> Result<Option<StatusRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT is_up, consecutive_failures, last_status_code, last_checked_at, \
                 last_alert_sent_at FROM target_status WHERE target_uuid = ?",
            )
            .await?;

        let mut rows = stmt.query(params![target_uuid.to_string()]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(StatusRecord {
                target_uuid,
                is_up: row.get::<i64>(0)? != 0,
                consecutive_failures: row.get::<i64>(1)? as u32,
                last_status_code: row.get::<Option<i64>>(2)?.map(|c| c as u16),
                last_checked_at: millis_to_ts(row.get(3)?),
                last_alert_sent_at: row.get::<Option<i64>>(4)?.map(millis_to_ts),
            }))
        } else {
            Ok(None)
        }
    }

    async fn upsert_status(&self, record: &StatusRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        // last_alert_sent_at is owned by mark_alert_sent; the conflict branch
        // deliberately leaves it untouched.
        conn.execute(
            "INSERT INTO target_status (target_uuid, is_up, consecutive_failures, \
             last_status_code, last_checked_at, last_alert_sent_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(target_uuid) DO UPDATE SET \
             is_up = excluded.is_up, \
             consecutive_failures = excluded.consecutive_failures, \
             last_status_code = excluded.last_status_code, \
             last_checked_at = excluded.last_checked_at",
            params![
                record.target_uuid.to_string(),
                if record.is_up { 1 } else { 0 },
                record.consecutive_failures as i64,
                record.last_status_code.map(|c| c as i64),
                ts_to_millis(record.last_checked_at),
                record.last_alert_sent_at.map(ts_to_millis)
            ],
        )
        .await?;
        Ok(())
    }

    async fn mark_alert_sent(&self, target_uuid: Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE target_status SET last_alert_sent_at = ? WHERE target_uuid = ?",
            params![ts_to_millis(at), target_uuid.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn append_check(&self, record: &CheckRecord) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO check_history (target_uuid, timestamp, status_code, is_up, \
             response_time_ms) VALUES (?, ?, ?, ?, ?)",
            params![
                record.target_uuid.to_string(),
                ts_to_millis(record.timestamp),
                record.status_code.map(|c| c as i64),
                if record.is_up { 1 } else { 0 },
                record.response_time_ms as i64
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn checks_between(
        &self,
        target_uuid: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, status_code, is_up, response_time_ms FROM check_history \
                 WHERE target_uuid = ? AND timestamp >= ? AND timestamp < ? ORDER BY timestamp",
            )
            .await?;

        let mut rows = stmt
            .query(params![target_uuid.to_string(), ts_to_millis(from), ts_to_millis(to)])
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(CheckRecord {
                id: Some(row.get(0)?),
                target_uuid,
                timestamp: millis_to_ts(row.get(1)?),
                status_code: row.get::<Option<i64>>(2)?.map(|c| c as u16),
                is_up: row.get::<i64>(3)? != 0,
                response_time_ms: row.get::<i64>(4)? as u64,
            });
        }

        Ok(records)
    }

    async fn delete_checks_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM check_history WHERE timestamp < ?", params![ts_to_millis(cutoff)])
            .await?;
        Ok(deleted)
    }

    async fn active_vulnerabilities(&self, target_uuid: Uuid) -> Result<Vec<VulnerabilityRecord>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VULNERABILITY_COLUMNS} FROM vulnerabilities \
                 WHERE target_uuid = ? AND resolved = 0"
            ))
            .await?;

        let mut rows = stmt.query(params![target_uuid.to_string()]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(vulnerability_from_row(&row)?);
        }

        Ok(records)
    }

    async fn insert_vulnerability(&self, record: &VulnerabilityRecord) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO vulnerabilities (target_uuid, cve_id, technology, version, severity, \
             score, source, description, reference_url, first_seen_at, resolved, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.target_uuid.to_string(),
                record.cve_id.clone(),
                record.technology.clone(),
                record.version.clone(),
                record.severity.to_string(),
                record.score,
                record.source.clone(),
                record.description.clone(),
                record.reference_url.clone(),
                ts_to_millis(record.first_seen_at),
                if record.resolved { 1 } else { 0 },
                record.resolved_at.map(ts_to_millis)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn resolve_vulnerability(
        &self,
        target_uuid: Uuid,
        cve_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        // Tombstone, never delete: history backs "this was fixed" alerts.
        conn.execute(
            "UPDATE vulnerabilities SET resolved = 1, resolved_at = ? \
             WHERE target_uuid = ? AND cve_id = ? AND resolved = 0",
            params![ts_to_millis(at), target_uuid.to_string(), cve_id],
        )
        .await?;
        Ok(())
    }

    async fn ignored_cves(&self, target_uuid: Uuid) -> Result<HashSet<String>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT cve_id FROM vulnerability_ignores WHERE target_uuid = ?")
            .await?;

        let mut rows = stmt.query(params![target_uuid.to_string()]).await?;
        let mut ignored = HashSet::new();
        while let Some(row) = rows.next().await? {
            ignored.insert(row.get::<String>(0)?);
        }

        Ok(ignored)
    }

    async fn add_ignores(
        &self,
        target_uuid: Uuid,
        cve_ids: &[String],
        ignored_by: &str,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp_millis();

        for cve_id in cve_ids {
            conn.execute(
                "INSERT OR IGNORE INTO vulnerability_ignores (target_uuid, cve_id, ignored_by, \
                 created_at) VALUES (?, ?, ?, ?)",
                params![target_uuid.to_string(), cve_id.clone(), ignored_by, now],
            )
            .await?;
        }

        Ok(())
    }
}
