use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::types::{Finding, Severity};

/// How long one fingerprinting query may take. The source is a third-party
/// API; the per-target bound here is what keeps the daily batch from hanging.
const SOURCE_TIMEOUT_SECONDS: u64 = 60;

/// Vulnerability source - fingerprints a URL's technologies and returns the
/// known CVEs per technology. The engine never looks inside this capability.
#[async_trait::async_trait]
pub trait VulnSource: Send + Sync {
    async fn scan(&self, url: &str) -> Result<Vec<Finding>>;
}

/// Wire format of one finding as the fingerprinting API reports it. Severity
/// arrives as a free-form label and is parsed leniently.
#[derive(Debug, Deserialize)]
struct WireFinding {
    #[serde(alias = "cve", alias = "id")]
    cve_id: String,
    #[serde(default)]
    technology: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "url")]
    reference_url: String,
}

impl WireFinding {
    fn into_finding(self, default_source: &str) -> Finding {
        Finding {
            cve_id: self.cve_id,
            technology: self.technology,
            version: self.version,
            severity: Severity::parse_lenient(&self.severity),
            score: self.score,
            source: self.source.unwrap_or_else(|| default_source.to_string()),
            description: self.description,
            reference_url: self.reference_url,
        }
    }
}

/// HTTP client for a fingerprinting API exposing `GET /scan?url=...`.
pub struct HttpVulnSource {
    client: reqwest::Client,
    scan_url: Url,
    api_key: Option<String>,
    source_name: String,
}

impl HttpVulnSource {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).context("invalid vulnerability source URL")?;
        let scan_url = base.join("scan").context("invalid vulnerability source URL")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SOURCE_TIMEOUT_SECONDS))
            .build()?;

        let source_name = base.host_str().unwrap_or("fingerprint-api").to_string();

        Ok(Self { client, scan_url, api_key, source_name })
    }
}

#[async_trait::async_trait]
impl VulnSource for HttpVulnSource {
    async fn scan(&self, url: &str) -> Result<Vec<Finding>> {
        let mut scan_url = self.scan_url.clone();
        scan_url.query_pairs_mut().append_pair("url", url);

        let mut request = self.client.get(scan_url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let findings: Vec<WireFinding> = request
            .send()
            .await
            .context("vulnerability source request failed")?
            .error_for_status()
            .context("vulnerability source returned an error status")?
            .json()
            .await
            .context("vulnerability source returned malformed findings")?;

        Ok(findings.into_iter().map(|f| f.into_finding(&self.source_name)).collect())
    }
}
