use anyhow::Result;
use std::time::{Duration, Instant};

/// Hard cap on how long a single health check may take, in milliseconds.
pub const PROBE_TIMEOUT_MS: u64 = 10_000;

/// Response bodies captured for diagnostics are truncated to this many
/// characters.
pub const BODY_CAPTURE_CHARS: usize = 3_000;

/// Outcome of one bounded-time health check.
///
/// Transport failures (timeout, DNS, refused connection) and application
/// failures (non-200 status) are both "down" but stay distinguishable:
/// the former carry no status code, the latter do.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub is_up: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    /// Body excerpt, present only on a down-but-responded check.
    pub body: Option<String>,
}

/// Probe trait - issues a single health check against a target URL.
///
/// No retries here: retry policy lives entirely in the threshold logic.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, url: &str) -> ProbeOutcome;
}

/// HTTP probe. A target is up iff a GET completes within the timeout with
/// status 200 exactly.
pub struct HttpProbe {
    client: reqwest::Client,
    body_capture_chars: usize,
}

impl HttpProbe {
    pub fn new(timeout_ms: u64, body_capture_chars: usize) -> Result<Self> {
        let client =
            reqwest::Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?;

        Ok(Self { client, body_capture_chars })
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn check(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        match self.client.get(url).send().await {
            Ok(response) => {
                let response_time_ms = start.elapsed().as_millis() as u64;
                let status_code = response.status().as_u16();

                if status_code == 200 {
                    ProbeOutcome {
                        is_up: true,
                        status_code: Some(status_code),
                        response_time_ms,
                        body: None,
                    }
                } else {
                    // Down but responded: keep an excerpt for the alert.
                    let body = response
                        .text()
                        .await
                        .ok()
                        .map(|text| truncate_chars(&text, self.body_capture_chars));

                    ProbeOutcome {
                        is_up: false,
                        status_code: Some(status_code),
                        response_time_ms,
                        body,
                    }
                }
            }
            Err(error) => {
                let response_time_ms = start.elapsed().as_millis() as u64;
                tracing::debug!("probe transport failure for {}: {}", url, error);

                ProbeOutcome { is_up: false, status_code: None, response_time_ms, body: None }
            }
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
