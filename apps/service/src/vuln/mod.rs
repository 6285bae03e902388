/// Vulnerability tracking module
///
/// This module owns the CVE side of the engine:
/// - Diffing fresh scan findings against the store (new / resolved / ignored)
/// - The HIGH-once / CRITICAL-always alert rule
/// - The daily, rate-limit-respecting scan batch and on-demand scans
pub mod diff;
pub mod scheduler;
pub mod source;
pub mod types;

pub use diff::{DiffEngine, ScanReport};
pub use scheduler::{VulnSchedule, VulnScheduler};
pub use source::{HttpVulnSource, VulnSource};
pub use types::{Finding, Severity};
