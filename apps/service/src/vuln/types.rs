use serde::{Deserialize, Serialize};

/// Vulnerability severity, ordered from least to most severe.
///
/// `Unknown` sorts below `Low`: findings the source could not classify are
/// tracked but never considered alertable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity label, falling back to `Unknown` for anything
    /// the source reports that we do not recognize.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Severity::Low,
            "MEDIUM" => Severity::Medium,
            "HIGH" => Severity::High,
            "CRITICAL" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    pub fn is_high_or_worse(self) -> bool {
        self >= Severity::High
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Unknown => write!(f, "UNKNOWN"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One vulnerability reported by a fresh scan, before it is diffed against
/// the store.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub cve_id: String,
    pub technology: String,
    pub version: String,
    pub severity: Severity,
    pub score: f64,
    pub source: String,
    pub description: String,
    pub reference_url: String,
}
