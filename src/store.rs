//! In-memory metric history and report persistence

use crate::config::ServiceTarget;
use crate::errors::{MonitorError, Result};
use crate::metrics::{
    MetricsSnapshot, MetricsSummary, OverallHealth, ServiceMetrics, ServiceStatus, SystemMetrics,
    WorkflowMetrics,
};
use crate::probe::ProbeResult;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Workflows included in a persisted report
pub const REPORT_WORKFLOWS: usize = 10;

/// Workflows the success rate is computed over
pub const SUCCESS_RATE_WINDOW: usize = 20;

/// Append-only history of everything one monitor run has observed
#[derive(Debug)]
pub struct MetricsStore {
    run_id: Uuid,
    service_names: Vec<String>,
    service_history: HashMap<String, VecDeque<ServiceMetrics>>,
    system_history: VecDeque<SystemMetrics>,
    workflow_history: VecDeque<WorkflowMetrics>,
    history_limit: usize,
}

impl MetricsStore {
    /// Create a store tracking `service_names`. `history_limit` is raised to 2
    /// so the previous observation is always available.
    pub fn new<I, S>(service_names: I, history_limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service_names: Vec<String> = service_names.into_iter().map(Into::into).collect();
        let service_history = service_names
            .iter()
            .map(|name| (name.clone(), VecDeque::new()))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            service_names,
            service_history,
            system_history: VecDeque::new(),
            workflow_history: VecDeque::new(),
            history_limit: history_limit.max(2),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn service_names(&self) -> &[String] {
        &self.service_names
    }

    /// Turn a probe result into the next observation for `target`, seeded
    /// from its previous counters, and append it.
    pub fn record_probe(&mut self, target: &ServiceTarget, result: &ProbeResult) -> &ServiceMetrics {
        if !self.service_names.contains(&target.name) {
            self.service_names.push(target.name.clone());
        }
        let history = self.service_history.entry(target.name.clone()).or_default();

        let metrics = ServiceMetrics::observe(
            &target.name,
            &target.base_url,
            &result.outcome,
            result.response_time,
            history.back(),
        );
        push_capped(history, metrics, self.history_limit);

        // just pushed, so the history is never empty here
        &history[history.len() - 1]
    }

    pub fn record_system(&mut self, metrics: SystemMetrics) {
        push_capped(&mut self.system_history, metrics, self.history_limit);
    }

    /// Workflows are kept for at least the success-rate window whatever
    /// `history_limit` says, so summaries and reports stay complete.
    pub fn record_workflow(&mut self, metrics: WorkflowMetrics) {
        let limit = self
            .history_limit
            .max(SUCCESS_RATE_WINDOW)
            .max(REPORT_WORKFLOWS);
        push_capped(&mut self.workflow_history, metrics, limit);
    }

    pub fn latest(&self, service_name: &str) -> Option<&ServiceMetrics> {
        self.service_history.get(service_name).and_then(|h| h.back())
    }

    /// Latest observation per tracked service, skipping services never probed
    pub fn latest_services(&self) -> BTreeMap<String, ServiceMetrics> {
        self.service_names
            .iter()
            .filter_map(|name| self.latest(name).map(|m| (name.clone(), m.clone())))
            .collect()
    }

    pub fn latest_system(&self) -> Option<&SystemMetrics> {
        self.system_history.back()
    }

    /// Up to `count` most recent workflows, oldest first
    pub fn recent_workflows(&self, count: usize) -> Vec<&WorkflowMetrics> {
        let skip = self.workflow_history.len().saturating_sub(count);
        self.workflow_history.iter().skip(skip).collect()
    }

    /// Up to `count` most recent response times for a service, oldest first
    pub fn response_history(&self, service_name: &str, count: usize) -> Vec<f64> {
        self.service_history
            .get(service_name)
            .map(|history| {
                let skip = history.len().saturating_sub(count);
                history.iter().skip(skip).map(|m| m.response_time).collect()
            })
            .unwrap_or_default()
    }

    pub fn history_len(&self, service_name: &str) -> usize {
        self.service_history.get(service_name).map_or(0, VecDeque::len)
    }

    /// Aggregate health from the latest observation of every tracked service
    pub fn summarize(&self) -> MetricsSummary {
        let services_total = self.service_names.len();
        let mut services_up = 0;
        let mut total_response_time = 0.0;

        for name in &self.service_names {
            if let Some(latest) = self.latest(name) {
                total_response_time += latest.response_time;
                if latest.status == ServiceStatus::Healthy {
                    services_up += 1;
                }
            }
        }

        let overall_health = if services_up == services_total {
            OverallHealth::Healthy
        } else if services_up > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Critical
        };

        let average_response_time = if services_total > 0 {
            total_response_time / services_total as f64
        } else {
            0.0
        };

        let recent = self.recent_workflows(SUCCESS_RATE_WINDOW);
        let workflow_success_rate = if recent.is_empty() {
            0.0
        } else {
            let successful = recent.iter().filter(|w| w.success).count();
            successful as f64 / recent.len() as f64 * 100.0
        };

        MetricsSummary {
            overall_health,
            services_up,
            services_total,
            average_response_time,
            workflow_success_rate,
        }
    }

    /// Read-only view of the latest state with the last `workflow_count` workflows
    pub fn snapshot(&self, workflow_count: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            run_id: self.run_id,
            services: self.latest_services(),
            system: self.latest_system().cloned(),
            workflows: self.recent_workflows(workflow_count).into_iter().cloned().collect(),
            summary: self.summarize(),
        }
    }

    /// Write a report into `reports_dir` under a fresh timestamped name.
    /// Existing files are never overwritten.
    pub async fn save_report(&self, reports_dir: &Path) -> Result<PathBuf> {
        let snapshot = self.snapshot(REPORT_WORKFLOWS);
        let body = serde_json::to_vec_pretty(&snapshot)?;

        tokio::fs::create_dir_all(reports_dir).await?;

        let stem = format!("metrics_report_{}", snapshot.timestamp.format("%Y%m%d_%H%M%S_%3f"));
        for attempt in 0..1000u32 {
            let file_name = match attempt {
                0 => format!("{}.json", stem),
                n => format!("{}_{}.json", stem, n),
            };
            let path = reports_dir.join(file_name);

            let file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Report {} already exists, trying next name", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            write_or_discard(&path, file, &body).await?;

            info!("Metrics report saved to {}", path.display());
            return Ok(path);
        }

        Err(MonitorError::Other(format!(
            "no free report file name for {} in {}",
            stem,
            reports_dir.display()
        )))
    }
}

/// Write `body` and flush. On failure the partly written file at `path` is
/// removed so no truncated report is left behind.
async fn write_or_discard<W>(path: &Path, mut writer: W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(body).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(writer);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove partial report {}: {}", path.display(), remove_err);
        }
        return Err(e.into());
    }

    Ok(())
}

fn push_capped<T>(history: &mut VecDeque<T>, item: T, limit: usize) {
    if history.len() >= limit {
        history.pop_front();
    }
    history.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ProbeOutcome, WorkflowStep};
    use tempfile::TempDir;

    fn target(name: &str) -> ServiceTarget {
        ServiceTarget::new(name, "http://localhost:9000", "/health")
    }

    fn result(outcome: ProbeOutcome, response_time: f64) -> ProbeResult {
        ProbeResult { outcome, response_time }
    }

    fn down() -> ProbeOutcome {
        ProbeOutcome::Down { reason: "connection refused".to_string() }
    }

    fn workflow(success: bool) -> WorkflowMetrics {
        WorkflowMetrics::completed(
            "end_to_end_user_interaction",
            vec![WorkflowStep::new("step", 0.1, success, String::new())],
            0.1,
        )
    }

    #[test]
    fn test_counters_follow_history() {
        let mut store = MetricsStore::new(["inference"], 100);
        let inference = target("inference");
        let outcomes = [ProbeOutcome::Healthy, down(), ProbeOutcome::Healthy, ProbeOutcome::Healthy];

        for outcome in outcomes {
            store.record_probe(&inference, &result(outcome, 0.2));
        }

        let latest = store.latest("inference").unwrap();
        assert_eq!(latest.success_count + latest.error_count, 4);
        assert_eq!(latest.uptime_percentage, 75.0);
        assert_eq!(store.history_len("inference"), 4);
    }

    #[test]
    fn test_history_cap_keeps_newest() {
        let mut store = MetricsStore::new(["inference"], 1);
        let inference = target("inference");
        for i in 0..5 {
            store.record_probe(&inference, &result(ProbeOutcome::Healthy, i as f64));
        }

        assert_eq!(store.history_len("inference"), 2);
        assert_eq!(store.response_history("inference", 10), vec![3.0, 4.0]);
        assert_eq!(store.latest("inference").unwrap().success_count, 5);
    }

    #[test]
    fn test_summary_classification() {
        let mut store = MetricsStore::new(["a", "b"], 10);
        store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));
        store.record_probe(&target("b"), &result(down(), 0.3));
        let summary = store.summarize();
        assert_eq!(summary.overall_health, OverallHealth::Degraded);
        assert_eq!(summary.services_up, 1);
        assert!((summary.average_response_time - 0.2).abs() < 1e-9);

        let mut store = MetricsStore::new(["a", "b"], 10);
        store.record_probe(&target("a"), &result(down(), 0.1));
        store.record_probe(&target("b"), &result(down(), 0.1));
        assert_eq!(store.summarize().overall_health, OverallHealth::Critical);

        let mut store = MetricsStore::new(["a", "b"], 10);
        store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));
        store.record_probe(&target("b"), &result(ProbeOutcome::Healthy, 0.1));
        let summary = store.summarize();
        assert_eq!(summary.overall_health, OverallHealth::Healthy);
        assert_eq!(summary.services_up, 2);
        assert_eq!(summary.services_total, 2);
    }

    #[test]
    fn test_unprobed_service_is_not_healthy() {
        let mut store = MetricsStore::new(["a", "b"], 10);
        store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));
        assert_eq!(store.summarize().overall_health, OverallHealth::Degraded);
        assert_eq!(store.latest_services().len(), 1);
    }

    #[test]
    fn test_workflow_success_rate_window() {
        let mut store = MetricsStore::new(["a"], 100);
        assert_eq!(store.summarize().workflow_success_rate, 0.0);

        for _ in 0..10 {
            store.record_workflow(workflow(false));
        }
        for _ in 0..15 {
            store.record_workflow(workflow(true));
        }
        // last 20: 5 failures, 15 successes
        assert_eq!(store.summarize().workflow_success_rate, 75.0);
        assert_eq!(store.recent_workflows(3).len(), 3);
        assert_eq!(store.recent_workflows(100).len(), 25);
    }

    #[tokio::test]
    async fn test_short_history_limit_keeps_workflow_window() {
        let dir = TempDir::new().unwrap();
        let mut store = MetricsStore::new(["a"], 5);
        for _ in 0..15 {
            store.record_workflow(workflow(false));
        }
        for _ in 0..5 {
            store.record_workflow(workflow(true));
        }

        assert_eq!(store.summarize().workflow_success_rate, 25.0);
        assert_eq!(store.recent_workflows(100).len(), SUCCESS_RATE_WINDOW);

        let path = store.save_report(dir.path()).await.unwrap();
        let report: MetricsSnapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(report.workflows.len(), REPORT_WORKFLOWS);
        assert_eq!(report.summary.workflow_success_rate, 25.0);

        // service history still honours the configured limit
        for _ in 0..10 {
            store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));
        }
        assert_eq!(store.history_len("a"), 5);
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("disk full")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics_report_partial.json");
        std::fs::write(&path, b"{").unwrap();

        let result = write_or_discard(&path, BrokenWriter, b"{\"services\": {}}").await;

        assert!(matches!(result, Err(MonitorError::Io(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reports_are_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let mut store = MetricsStore::new(["a"], 10);
        store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));

        let first = store.save_report(dir.path()).await.unwrap();
        let second = store.save_report(dir.path()).await.unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_report_contents() {
        let dir = TempDir::new().unwrap();
        let mut store = MetricsStore::new(["a", "b"], 100);
        store.record_probe(&target("a"), &result(ProbeOutcome::Healthy, 0.1));
        store.record_probe(&target("b"), &result(ProbeOutcome::Degraded { status_code: 404 }, 0.1));
        store.record_system(SystemMetrics::zeroed());
        for _ in 0..12 {
            store.record_workflow(workflow(true));
        }

        let path = store.save_report(&dir.path().join("reports")).await.unwrap();
        let report: MetricsSnapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

        assert_eq!(report.run_id, store.run_id());
        assert_eq!(report.services.len(), 2);
        assert_eq!(report.workflows.len(), REPORT_WORKFLOWS);
        assert!(report.system.is_some());
        assert_eq!(report.summary.services_up, 1);
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("metrics_report_"));
    }
}
