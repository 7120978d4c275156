//! AI Tutor Service Monitor Library
//!
//! This library polls the tutoring stack's HTTP services, keeps rolling
//! uptime and latency history, runs a synthetic end-to-end workflow probe and
//! renders a self-refreshing HTML status dashboard.

pub mod config;
pub mod metrics;
pub mod probe;
pub mod sampler;
pub mod workflow;
pub mod quota;
pub mod alerts;
pub mod store;
pub mod dashboard;
pub mod runner;
pub mod logging;
pub mod errors;

pub use config::{Config, ServiceTarget, WorkflowConfig};
pub use metrics::{
    MetricsSnapshot, MetricsSummary, OverallHealth, ProbeOutcome, ServiceMetrics, ServiceStatus,
    SystemMetrics, WorkflowMetrics, WorkflowStep,
};
pub use alerts::{Alert, AlertEvaluator, AlertSeverity, AlertThresholds};
pub use store::MetricsStore;
pub use dashboard::DashboardRenderer;
pub use runner::{CycleReport, MonitorRunner, RunState, ShutdownHandle};
pub use errors::{MonitorError, Result};
