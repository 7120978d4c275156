//! Monitoring loop: probes, sampling, workflow checks, reports and dashboard

use crate::alerts::{Alert, AlertEvaluator};
use crate::config::Config;
use crate::dashboard::{CHART_POINTS, DASHBOARD_WORKFLOWS, DashboardPaths, DashboardRenderer};
use crate::errors::{MonitorError, Result};
use crate::metrics::{MetricsSummary, OverallHealth, ServiceMetrics, SystemMetrics, WorkflowMetrics};
use crate::probe::ServiceProbe;
use crate::quota::{QuotaProbe, QuotaStatus};
use crate::sampler::{HostSampler, SysinfoSampler};
use crate::store::MetricsStore;
use crate::workflow::WorkflowProbe;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

/// Exit status of a single check that found the stack unhealthy, when the
/// caller asked for one
pub const UNHEALTHY_EXIT_STATUS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

/// Cloneable stop flag shared between signal handlers and the loop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn request(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn requested(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = receiver.wait_for(|stop| *stop).await;
    }
}

/// Everything one cycle observed
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub services: Vec<ServiceMetrics>,
    pub system: SystemMetrics,
    pub workflow: WorkflowMetrics,
    pub quota: QuotaStatus,
    pub alerts: Vec<Alert>,
    pub report_path: Option<PathBuf>,
    pub dashboard: Option<DashboardPaths>,
}

pub struct MonitorRunner {
    config: Config,
    probe: ServiceProbe,
    sampler: Box<dyn HostSampler>,
    workflow: WorkflowProbe,
    quota: QuotaProbe,
    evaluator: AlertEvaluator,
    renderer: DashboardRenderer,
    store: MetricsStore,
    cycle_count: u64,
    state: Arc<watch::Sender<RunState>>,
    shutdown: ShutdownHandle,
}

impl MonitorRunner {
    /// Build a runner from validated configuration and create its output
    /// directories. Any failure here is a startup failure.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().map_err(MonitorError::Config)?;

        std::fs::create_dir_all(config.reports_dir())?;
        std::fs::create_dir_all(config.dashboards_dir())?;

        let probe = ServiceProbe::new(config.http_timeout)?;
        let workflow = WorkflowProbe::new(config.workflow.clone(), config.http_timeout)?;
        let quota = QuotaProbe::new(config.workflow.inference_chat_url(), config.http_timeout)?;
        let renderer = DashboardRenderer::new(config.dashboards_dir(), config.dashboard_refresh)?;
        let store = MetricsStore::new(
            config.services.iter().map(|s| s.name.clone()),
            config.history_limit,
        );

        Ok(Self {
            probe,
            sampler: Box::new(SysinfoSampler::default()),
            workflow,
            quota,
            evaluator: AlertEvaluator::new(config.thresholds.clone()),
            renderer,
            store,
            cycle_count: 0,
            state: Arc::new(watch::channel(RunState::Stopped).0),
            shutdown: ShutdownHandle::new(),
            config,
        })
    }

    /// Replace the host sampler
    pub fn with_sampler(mut self, sampler: Box<dyn HostSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Follow state changes while the runner is borrowed by `run`
    pub fn state_watch(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn cycles(&self) -> u64 {
        self.cycle_count
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.store.run_id()
    }

    /// Run cycles until shutdown is requested. The cycle in flight when the
    /// request arrives always completes, dashboard included.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting AI tutor monitoring system, run {}", self.run_id());
        info!("Check interval: {} seconds", self.config.check_interval.as_secs());
        info!("Reports: {}", self.config.reports_dir().display());
        info!("Dashboard: {}", self.renderer.html_path().display());

        self.state.send_replace(RunState::Running);

        loop {
            self.run_cycle_observing_shutdown().await;

            if self.shutdown.is_requested() {
                mark_stopping(&self.state);
                break;
            }

            info!(
                "Waiting {} seconds until next check...",
                self.config.check_interval.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {}
                _ = self.shutdown.requested() => {}
            }

            if self.shutdown.is_requested() {
                mark_stopping(&self.state);
                break;
            }
        }

        info!("Shutdown requested after {} cycles", self.cycle_count);
        self.state.send_replace(RunState::Stopped);
        info!("Monitoring system stopped");
        Ok(())
    }

    /// Run exactly one cycle
    pub async fn run_single(&mut self) -> CycleReport {
        info!("Running single monitoring check, run {}", self.run_id());
        self.state.send_replace(RunState::Running);
        let report = self.run_cycle().await;
        self.state.send_replace(RunState::Stopped);
        info!("Single check completed");
        report
    }

    /// Run one cycle, moving to `Stopping` as soon as shutdown is requested.
    /// The cycle itself always runs to completion.
    async fn run_cycle_observing_shutdown(&mut self) {
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        let cycle = self.run_cycle();
        tokio::pin!(cycle);

        tokio::select! {
            _ = &mut cycle => {}
            _ = shutdown.requested() => {
                mark_stopping(&state);
                cycle.await;
            }
        }
    }

    /// Run one full cycle. Individual probe, sampler, workflow, report and
    /// dashboard failures are recorded or logged, never propagated.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;
        let cycle = self.cycle_count;
        let span = info_span!("monitor_cycle", cycle);
        self.execute_cycle(cycle).instrument(span).await
    }

    async fn execute_cycle(&mut self, cycle: u64) -> CycleReport {
        info!("{}", "=".repeat(60));
        info!("MONITORING CYCLE #{}", cycle);
        info!("{}", "=".repeat(60));

        let results = join_all(self.config.services.iter().map(|target| self.probe.check(target))).await;
        let mut services = Vec::with_capacity(results.len());
        for (target, result) in self.config.services.iter().zip(results) {
            services.push(self.store.record_probe(target, &result).clone());
        }

        let system = self.sampler.sample().await;
        self.store.record_system(system.clone());

        let workflow = self.workflow.run().await;
        self.store.record_workflow(workflow.clone());

        let alerts = self
            .evaluator
            .evaluate_all(&services, Some(&system), Some(&workflow));
        log_alerts(&alerts);

        let quota = self.quota.check().await;

        info!("Monitoring cycle #{} summary:", cycle);
        for metrics in &services {
            info!("  {}: {} ({:.2}s)", metrics.name, metrics.status, metrics.response_time);
        }
        info!(
            "  System: CPU {:.1}%, Memory {:.1}%",
            system.cpu_usage, system.memory_usage
        );
        info!(
            "  Workflow: {} ({:.2}s)",
            if workflow.success { "SUCCESS" } else { "FAILED" },
            workflow.total_time
        );
        info!("  LLM quota: {}", quota.status);

        let report_path = if cycle % self.config.report_every == 0 {
            match self.store.save_report(&self.config.reports_dir()).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Failed to save metrics report: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let dashboard = self.update_dashboard(&alerts).await;

        info!("Cycle #{} completed", cycle);

        CycleReport {
            cycle,
            services,
            system,
            workflow,
            quota,
            alerts,
            report_path,
            dashboard,
        }
    }

    async fn update_dashboard(&self, alerts: &[Alert]) -> Option<DashboardPaths> {
        let snapshot = self.store.snapshot(DASHBOARD_WORKFLOWS);
        let history: Vec<(String, Vec<f64>)> = self
            .store
            .service_names()
            .iter()
            .map(|name| (name.clone(), self.store.response_history(name, CHART_POINTS)))
            .collect();

        match self.renderer.write(&snapshot, alerts, &history).await {
            Ok(paths) => {
                info!("Dashboard updated: {}", paths.html.display());
                Some(paths)
            }
            Err(e) => {
                error!("Error updating dashboard: {}", e);
                None
            }
        }
    }
}

fn mark_stopping(state: &watch::Sender<RunState>) {
    let changed = state.send_if_modified(|state| {
        if *state == RunState::Running {
            *state = RunState::Stopping;
            true
        } else {
            false
        }
    });
    if changed {
        info!("Stopping after the current cycle");
    }
}

/// Exit status for a finished single check. The check ran, so health is
/// reported through logs and output files and the status is 0, unless the
/// caller opted into failing on anything short of healthy.
pub fn single_check_exit_status(summary: &MetricsSummary, fail_on_unhealthy: bool) -> u8 {
    if fail_on_unhealthy && summary.overall_health != OverallHealth::Healthy {
        UNHEALTHY_EXIT_STATUS
    } else {
        0
    }
}

fn log_alerts(alerts: &[Alert]) {
    for alert in alerts {
        warn!(severity = ?alert.severity, "ALERT: {}", alert);
    }
}

/// Request shutdown on Ctrl-C or SIGTERM
pub fn spawn_signal_listener(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, finishing current cycle");
        handle.request();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                }
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceTarget, WorkflowConfig};
    use crate::metrics::{NetworkIo, ServiceStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedSampler;

    #[async_trait]
    impl HostSampler for FixedSampler {
        async fn sample(&self) -> SystemMetrics {
            SystemMetrics {
                cpu_usage: 12.5,
                memory_usage: 40.0,
                disk_usage: 55.0,
                network_io: NetworkIo { bytes_sent: 10, bytes_recv: 20 },
                timestamp: Utc::now(),
            }
        }
    }

    fn config_for(server: &MockServer, output: &TempDir) -> Config {
        Config {
            services: vec![
                ServiceTarget::new("inference", &server.uri(), "/health"),
                ServiceTarget::new("gateway", &server.uri(), "/api/health"),
                ServiceTarget::new("frontend", &server.uri(), "/"),
            ],
            workflow: WorkflowConfig {
                inference_url: server.uri(),
                gateway_url: server.uri(),
                ..WorkflowConfig::default()
            },
            http_timeout: Duration::from_secs(2),
            output_dir: output.path().to_path_buf(),
            ..Config::default()
        }
    }

    async fn mount_healthy(server: &MockServer, expected_cycles: u64) {
        for health_path in ["/health", "/api/health", "/"] {
            Mock::given(method("GET"))
                .and(path(health_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
                .expect(expected_cycles)
                .mount(server)
                .await;
        }
        mount_chat(server).await;
    }

    async fn mount_chat(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "4" })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Problem Analysis: add. Step-by-Step: 2+2. Solution: 4",
                "enhanced": true
            })))
            .mount(server)
            .await;
    }

    fn runner(config: Config) -> MonitorRunner {
        MonitorRunner::new(config).unwrap().with_sampler(Box::new(FixedSampler))
    }

    #[tokio::test]
    async fn test_single_check_probes_each_service_once() {
        let server = MockServer::start().await;
        mount_healthy(&server, 1).await;
        let output = TempDir::new().unwrap();

        let mut runner = runner(config_for(&server, &output));
        let report = runner.run_single().await;

        assert_eq!(report.cycle, 1);
        assert_eq!(runner.cycles(), 1);
        assert_eq!(runner.state(), RunState::Stopped);
        assert!(report.services.iter().all(|s| s.status == ServiceStatus::Healthy));
        assert!(report.workflow.success);
        assert!(report.alerts.is_empty());
        assert!(report.report_path.is_none());
        assert_eq!(runner.store().summarize().overall_health, OverallHealth::Healthy);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_failing_service_does_not_stop_the_cycle() {
        let server = MockServer::start().await;
        mount_chat(&server).await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let output = TempDir::new().unwrap();

        let mut config = config_for(&server, &output);
        config.services = vec![
            ServiceTarget::new("inference", &server.uri(), "/health"),
            ServiceTarget::new("gateway", "http://127.0.0.1:1", "/api/health"),
        ];

        let mut runner = runner(config);
        let report = runner.run_cycle().await;

        assert_eq!(report.services.len(), 2);
        assert_eq!(report.services[0].status, ServiceStatus::Healthy);
        assert_eq!(report.services[1].status, ServiceStatus::Down);
        assert_eq!(report.services[1].uptime_percentage, 0.0);
        assert_eq!(report.system.cpu_usage, 12.5);
        assert!(report.workflow.success);
        assert!(report.alerts.iter().any(|a| a.message == "SERVICE DOWN: gateway is not responding"));

        let paths = report.dashboard.expect("dashboard written");
        let latest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(paths.json).unwrap()).unwrap();
        assert_eq!(latest["summary"]["overall_health"], "degraded");
        assert_eq!(latest["summary"]["services_up"], 1);
        let html = std::fs::read_to_string(paths.html).unwrap();
        assert!(html.contains("status-card status-down"));
    }

    #[tokio::test]
    async fn test_reports_follow_cadence() {
        let server = MockServer::start().await;
        mount_healthy(&server, 4).await;
        let output = TempDir::new().unwrap();

        let mut config = config_for(&server, &output);
        config.report_every = 2;
        let reports_dir = config.reports_dir();

        let mut runner = runner(config);
        let mut saved = Vec::new();
        for _ in 0..4 {
            if let Some(path) = runner.run_cycle().await.report_path {
                saved.push(path);
            }
        }

        assert_eq!(saved.len(), 2);
        assert_ne!(saved[0], saved[1]);
        assert_eq!(std::fs::read_dir(reports_dir).unwrap().count(), 2);

        let latest = runner.store().latest("frontend").unwrap();
        assert_eq!(latest.success_count + latest.error_count, 4);
        assert_eq!(latest.uptime_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let server = MockServer::start().await;
        mount_healthy(&server, 1).await;
        let output = TempDir::new().unwrap();

        let mut config = config_for(&server, &output);
        config.check_interval = Duration::from_secs(3600);

        let mut runner = runner(config);
        let handle = runner.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.request();
        });

        tokio::time::timeout(Duration::from_secs(10), runner.run())
            .await
            .expect("shutdown should cut the wait short")
            .unwrap();

        assert_eq!(runner.cycles(), 1);
        assert_eq!(runner.state(), RunState::Stopped);
        assert!(output.path().join("dashboards").join("index.html").exists());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_one_cycle() {
        let server = MockServer::start().await;
        mount_healthy(&server, 1).await;
        let output = TempDir::new().unwrap();

        let mut runner = runner(config_for(&server, &output));
        runner.shutdown_handle().request();
        runner.run().await.unwrap();

        assert_eq!(runner.cycles(), 1);
    }

    #[tokio::test]
    async fn test_single_check_exit_status() {
        let server = MockServer::start().await;
        mount_healthy(&server, 1).await;
        let output = TempDir::new().unwrap();

        let mut healthy = runner(config_for(&server, &output));
        healthy.run_single().await;
        let summary = healthy.store().summarize();
        assert_eq!(single_check_exit_status(&summary, false), 0);
        assert_eq!(single_check_exit_status(&summary, true), 0);

        let mut config = config_for(&server, &output);
        config.services = vec![ServiceTarget::new("inference", "http://127.0.0.1:1", "/health")];
        config.http_timeout = Duration::from_secs(1);
        let mut unreachable = runner(config);
        let report = unreachable.run_single().await;
        let summary = unreachable.store().summarize();

        assert_eq!(report.services[0].status, ServiceStatus::Down);
        assert_eq!(summary.overall_health, OverallHealth::Critical);
        assert_eq!(single_check_exit_status(&summary, false), 0);
        assert_eq!(single_check_exit_status(&summary, true), UNHEALTHY_EXIT_STATUS);
    }

    #[tokio::test]
    async fn test_shutdown_mid_cycle_passes_through_stopping() {
        let server = MockServer::start().await;
        mount_chat(&server).await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&server)
            .await;
        let output = TempDir::new().unwrap();

        let mut config = config_for(&server, &output);
        config.services = vec![ServiceTarget::new("inference", &server.uri(), "/health")];
        config.check_interval = Duration::from_secs(3600);

        let mut runner = runner(config);
        let handle = runner.shutdown_handle();
        let mut states = runner.state_watch();
        assert_eq!(*states.borrow(), RunState::Stopped);

        let observer = async {
            states.wait_for(|state| *state == RunState::Running).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.request();
            states.wait_for(|state| *state == RunState::Stopping).await.is_ok()
        };

        let (result, saw_stopping) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(runner.run(), observer)
        })
        .await
        .expect("shutdown should end the run");

        result.unwrap();
        assert!(saw_stopping);
        assert_eq!(runner.cycles(), 1);
        assert_eq!(runner.state(), RunState::Stopped);
        assert!(output.path().join("dashboards").join("index.html").exists());
        server.verify().await;
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.services.clear();
        assert!(matches!(MonitorRunner::new(config), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_shutdown_handle_is_shared() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_requested());
        clone.request();
        assert!(handle.is_requested());
    }
}
