//! Aggregated health reporting.
//!
//! Folds a `status all` batch into a single [`DaemonHealth`] report.
//!
//! # Aggregation Rule
//!
//! - No crashed units and every status readable -> Healthy
//! - Any crashed unit -> Degraded(reason)
//! - Any unit whose status could not be read -> Unhealthy(reason)

use serde::Serialize;

use ironbot_control::BatchReport;
use ironbot_supervisor::ProcessState;

/// Overall daemon health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Per-state unit counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounts {
    pub total: usize,
    pub running: usize,
    pub starting: usize,
    pub stopping: usize,
    pub stopped: usize,
    pub crashed: usize,
    pub disabled: usize,
    pub unreadable: usize,
}

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    pub health: HealthStatus,
    pub uptime_secs: u64,
    pub version: &'static str,
    pub plan_fingerprint: String,
    pub units: UnitCounts,
}

/// Count unit states and derive the overall status.
pub fn aggregate(report: &BatchReport) -> (HealthStatus, UnitCounts) {
    let mut counts = UnitCounts {
        total: report.outcomes.len(),
        ..UnitCounts::default()
    };
    let mut crashed = Vec::new();
    let mut unreadable = Vec::new();

    for outcome in &report.outcomes {
        let Some(status) = outcome.status() else {
            counts.unreadable += 1;
            unreadable.push(outcome.unit_id.to_string());
            continue;
        };
        match status.state {
            ProcessState::Running => counts.running += 1,
            ProcessState::Starting => counts.starting += 1,
            ProcessState::Stopping => counts.stopping += 1,
            ProcessState::Stopped => counts.stopped += 1,
            ProcessState::Disabled => counts.disabled += 1,
            ProcessState::Crashed => {
                counts.crashed += 1;
                crashed.push(outcome.unit_id.to_string());
            }
        }
    }

    let status = if !unreadable.is_empty() {
        HealthStatus::Unhealthy(format!("status unreadable: {}", unreadable.join(", ")))
    } else if !crashed.is_empty() {
        HealthStatus::Degraded(format!("crashed: {}", crashed.join(", ")))
    } else {
        HealthStatus::Healthy
    };
    (status, counts)
}
