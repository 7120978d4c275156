//! Threshold checks over the latest metrics

use crate::metrics::{ServiceMetrics, ServiceStatus, SystemMetrics, WorkflowMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertThresholds {
    /// Seconds
    pub response_time: f64,
    /// Fraction of failed checks, 0.0..=1.0
    pub error_rate: f64,
    /// Percent
    pub cpu_usage: f64,
    /// Percent
    pub memory_usage: f64,
    /// Percent
    pub uptime: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time: 5.0,
            error_rate: 0.1,
            cpu_usage: 80.0,
            memory_usage: 85.0,
            uptime: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A transient threshold violation; rendered and logged, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
}

impl Alert {
    fn warning(message: String) -> Self {
        Self { severity: AlertSeverity::Warning, message }
    }

    fn critical(message: String) -> Self {
        Self { severity: AlertSeverity::Critical, message }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate_service(&self, metrics: &ServiceMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if metrics.response_time > self.thresholds.response_time {
            alerts.push(Alert::warning(format!(
                "HIGH RESPONSE TIME: {} responding in {:.2}s",
                metrics.name, metrics.response_time
            )));
        }

        if metrics.uptime_percentage < self.thresholds.uptime {
            alerts.push(Alert::warning(format!(
                "LOW UPTIME: {} uptime is {:.1}%",
                metrics.name, metrics.uptime_percentage
            )));
        }

        if metrics.total_checks() > 0 && metrics.error_rate() > self.thresholds.error_rate {
            alerts.push(Alert::warning(format!(
                "HIGH ERROR RATE: {} error rate is {:.1}%",
                metrics.name,
                metrics.error_rate() * 100.0
            )));
        }

        match metrics.status {
            ServiceStatus::Down => alerts.push(Alert::critical(format!(
                "SERVICE DOWN: {} is not responding",
                metrics.name
            ))),
            ServiceStatus::Degraded => alerts.push(Alert::warning(format!(
                "SERVICE DEGRADED: {} is experiencing issues",
                metrics.name
            ))),
            ServiceStatus::Healthy => {}
        }

        alerts
    }

    pub fn evaluate_system(&self, metrics: &SystemMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if metrics.cpu_usage > self.thresholds.cpu_usage {
            alerts.push(Alert::warning(format!("HIGH CPU USAGE: {:.1}%", metrics.cpu_usage)));
        }

        if metrics.memory_usage > self.thresholds.memory_usage {
            alerts.push(Alert::warning(format!("HIGH MEMORY USAGE: {:.1}%", metrics.memory_usage)));
        }

        alerts
    }

    pub fn evaluate_workflow(&self, metrics: &WorkflowMetrics) -> Vec<Alert> {
        if metrics.success {
            return Vec::new();
        }

        vec![Alert::critical(format!(
            "WORKFLOW FAILED: {} did not complete successfully",
            metrics.workflow_name
        ))]
    }

    /// Alerts for everything in the latest view, services first
    pub fn evaluate_all<'a>(
        &self,
        services: impl IntoIterator<Item = &'a ServiceMetrics>,
        system: Option<&SystemMetrics>,
        workflow: Option<&WorkflowMetrics>,
    ) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = services
            .into_iter()
            .flat_map(|metrics| self.evaluate_service(metrics))
            .collect();

        if let Some(system) = system {
            alerts.extend(self.evaluate_system(system));
        }

        if let Some(workflow) = workflow {
            alerts.extend(self.evaluate_workflow(workflow));
        }

        alerts
    }
}
