use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::database::models::{Target, VulnerabilityRecord};
use crate::vuln::types::{Finding, Severity};

/// Identity of the target an alert concerns, including the channel the sink
/// should deliver to.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRef {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub channel: String,
}

impl TargetRef {
    pub fn from_target(target: &Target) -> Self {
        Self {
            id: target.uuid,
            name: target.name.clone(),
            url: target.url.clone(),
            channel: target.alert_channel.clone(),
        }
    }
}

/// Condensed CVE data carried inside vulnerability alerts.
#[derive(Debug, Clone, Serialize)]
pub struct CveSummary {
    pub cve_id: String,
    pub technology: String,
    pub version: String,
    pub severity: Severity,
    pub score: f64,
    pub reference_url: String,
}

impl CveSummary {
    pub fn from_finding(finding: &Finding) -> Self {
        Self {
            cve_id: finding.cve_id.clone(),
            technology: finding.technology.clone(),
            version: finding.version.clone(),
            severity: finding.severity,
            score: finding.score,
            reference_url: finding.reference_url.clone(),
        }
    }

    pub fn from_record(record: &VulnerabilityRecord) -> Self {
        Self {
            cve_id: record.cve_id.clone(),
            technology: record.technology.clone(),
            version: record.version.clone(),
            severity: record.severity,
            score: record.score,
            reference_url: record.reference_url.clone(),
        }
    }
}

/// Alert payloads handed to the sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alert {
    Down {
        target: TargetRef,
        status_code: Option<u16>,
        consecutive_failures: u32,
        /// True for the reminder fired after continued failure past the
        /// first alert.
        escalation: bool,
        body_excerpt: Option<String>,
    },
    Recovered {
        target: TargetRef,
        /// How many checks the outage lasted.
        failed_checks: u32,
    },
    VulnNew {
        target: TargetRef,
        new_high: Vec<CveSummary>,
        active_critical: Vec<CveSummary>,
    },
    VulnResolved {
        target: TargetRef,
        resolved: Vec<CveSummary>,
    },
}

/// Alert sink - the single outward edge of the engine.
///
/// Delivery is at most once, best effort: failures are logged by the caller
/// and never retried, and they never roll back the state change that
/// triggered the alert.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

const WEBHOOK_TIMEOUT_SECONDS: u64 = 15;

/// Sink that POSTs the JSON-serialized alert to a configured webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        self.client.post(&self.url).json(alert).send().await?.error_for_status()?;
        Ok(())
    }
}

/// Fallback sink used when no webhook is configured: alerts land in the log.
pub struct LogSink;

#[async_trait::async_trait]
impl AlertSink for LogSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        tracing::info!("alert: {}", serde_json::to_string(alert)?);
        Ok(())
    }
}
