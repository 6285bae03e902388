/// Uptime monitoring module
///
/// This module owns the up/down side of the engine:
/// - Issuing bounded-time health checks against target URLs
/// - Tracking per-target consecutive-failure state
/// - The two-stage alert policy (threshold, escalation, recovery)
/// - Per-target recurring check tasks
pub mod policy;
pub mod probe;
pub mod scheduler;
pub mod status;

pub use probe::{HttpProbe, Probe, ProbeOutcome};
pub use scheduler::UptimeScheduler;
pub use status::StatusTracker;
