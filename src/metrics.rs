//! Metric records produced by the monitor and the snapshot shape written to disk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Down => "down",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of a single health check
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeOutcome {
    /// HTTP 200
    Healthy,
    /// Non-200 status below 500
    Degraded { status_code: u16 },
    /// 5xx status, or the request never produced a response
    Down { reason: String },
}

impl ProbeOutcome {
    /// Classify an HTTP status code the way the health checks expect
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            200 => ProbeOutcome::Healthy,
            code if code >= 500 => ProbeOutcome::Down {
                reason: format!("HTTP {}", code),
            },
            code => ProbeOutcome::Degraded { status_code: code },
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match self {
            ProbeOutcome::Healthy => ServiceStatus::Healthy,
            ProbeOutcome::Degraded { .. } => ServiceStatus::Degraded,
            ProbeOutcome::Down { .. } => ServiceStatus::Down,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            ProbeOutcome::Healthy => None,
            ProbeOutcome::Degraded { status_code } => Some(format!("HTTP {}", status_code)),
            ProbeOutcome::Down { reason } => Some(reason.clone()),
        }
    }
}

/// One observation of one monitored service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceMetrics {
    pub name: String,
    pub url: String,
    pub status: ServiceStatus,
    /// Seconds
    pub response_time: f64,
    pub last_check: DateTime<Utc>,
    pub error_count: u64,
    pub success_count: u64,
    pub uptime_percentage: f64,
    pub last_error: Option<String>,
}

impl ServiceMetrics {
    /// Build the next observation for a service, carrying the counters forward
    /// from `previous` and incrementing exactly one of them.
    pub fn observe(
        name: &str,
        url: &str,
        outcome: &ProbeOutcome,
        response_time: f64,
        previous: Option<&ServiceMetrics>,
    ) -> Self {
        let (mut success_count, mut error_count) = previous
            .map(|p| (p.success_count, p.error_count))
            .unwrap_or((0, 0));

        match outcome {
            ProbeOutcome::Healthy => success_count += 1,
            _ => error_count += 1,
        }

        Self {
            name: name.to_string(),
            url: url.to_string(),
            status: outcome.status(),
            response_time: response_time.max(0.0),
            last_check: Utc::now(),
            error_count,
            success_count,
            uptime_percentage: uptime_percentage(success_count, error_count),
            last_error: outcome.error_message(),
        }
    }

    pub fn total_checks(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Fraction of failed checks, 0.0 when nothing has been observed
    pub fn error_rate(&self) -> f64 {
        match self.total_checks() {
            0 => 0.0,
            total => self.error_count as f64 / total as f64,
        }
    }
}

/// Successes over total observations as a percentage; 100 when nothing has
/// been observed yet.
pub fn uptime_percentage(success_count: u64, error_count: u64) -> f64 {
    let total = success_count + error_count;
    if total == 0 {
        100.0
    } else {
        success_count as f64 / total as f64 * 100.0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkIo {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Point-in-time host resource snapshot
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_io: NetworkIo,
    pub timestamp: DateTime<Utc>,
}

impl SystemMetrics {
    /// Placeholder sample used when host counters cannot be read
    pub fn zeroed() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            network_io: NetworkIo::default(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    /// Seconds
    pub duration: f64,
    pub success: bool,
    pub details: String,
}

impl WorkflowStep {
    pub fn new(name: &str, duration: f64, success: bool, details: String) -> Self {
        Self {
            name: name.to_string(),
            duration,
            success,
            details,
        }
    }
}

/// Result of one synthetic end-to-end probe
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetrics {
    pub workflow_name: String,
    /// Seconds
    pub total_time: f64,
    pub steps: Vec<WorkflowStep>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl WorkflowMetrics {
    /// A probe that ran to the end; success is the AND of every step
    pub fn completed(workflow_name: &str, steps: Vec<WorkflowStep>, total_time: f64) -> Self {
        let success = !steps.is_empty() && steps.iter().all(|step| step.success);
        Self {
            workflow_name: workflow_name.to_string(),
            total_time,
            steps,
            success,
            timestamp: Utc::now(),
            error_message: None,
        }
    }

    /// A probe that stopped early; keeps whatever steps finished
    pub fn aborted(
        workflow_name: &str,
        steps: Vec<WorkflowStep>,
        total_time: f64,
        error_message: String,
    ) -> Self {
        Self {
            workflow_name: workflow_name.to_string(),
            total_time,
            steps,
            success: false,
            timestamp: Utc::now(),
            error_message: Some(error_message),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    pub overall_health: OverallHealth,
    pub services_up: usize,
    pub services_total: usize,
    pub average_response_time: f64,
    pub workflow_success_rate: f64,
}

/// Aggregate view written as the latest-metrics JSON and as persisted reports
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub services: BTreeMap<String, ServiceMetrics>,
    pub system: Option<SystemMetrics>,
    pub workflows: Vec<WorkflowMetrics>,
    pub summary: MetricsSummary,
}
