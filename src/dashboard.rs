//! HTML status dashboard and latest-metrics JSON

use crate::alerts::Alert;
use crate::errors::Result;
use crate::metrics::{MetricsSnapshot, ServiceMetrics, ServiceStatus};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DASHBOARD_FILE: &str = "index.html";
pub const LATEST_METRICS_FILE: &str = "latest_metrics.json";

/// Workflows written into the latest-metrics JSON
pub const DASHBOARD_WORKFLOWS: usize = 5;

/// Response-time points plotted per service
pub const CHART_POINTS: usize = 10;

const TEMPLATE_NAME: &str = "dashboard";

const CHART_COLORS: &[&str] = &["#3498db", "#e74c3c", "#27ae60", "#9b59b6", "#f39c12"];
const FALLBACK_COLOR: &str = "#95a5a6";

const ALL_NORMAL: &str = "All systems operating normally";

const DASHBOARD_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>AI Tutor - System Monitor</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            color: #333;
            min-height: 100vh;
        }
        .container { max-width: 1400px; margin: 0 auto; padding: 20px; }
        .panel {
            background: rgba(255,255,255,0.95);
            padding: 20px;
            border-radius: 15px;
            margin-bottom: 20px;
            box-shadow: 0 8px 32px rgba(0,0,0,0.1);
        }
        .header h1 { color: #2c3e50; text-align: center; font-size: 2.5em; margin-bottom: 10px; }
        .overall { text-align: center; font-weight: bold; }
        .overall-healthy { color: #27ae60; }
        .overall-degraded { color: #f39c12; }
        .overall-critical { color: #e74c3c; }
        .status-overview {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(250px, 1fr));
            gap: 15px;
            margin-bottom: 20px;
        }
        .status-card {
            background: rgba(255,255,255,0.95);
            padding: 20px;
            border-radius: 15px;
            box-shadow: 0 8px 32px rgba(0,0,0,0.1);
        }
        .status-healthy { border-left: 5px solid #27ae60; }
        .status-degraded { border-left: 5px solid #f39c12; }
        .status-down { border-left: 5px solid #e74c3c; }
        .service-name { font-size: 1.2em; font-weight: bold; margin-bottom: 10px; color: #2c3e50; }
        .metric { display: flex; justify-content: space-between; margin: 5px 0; font-size: 0.9em; }
        .metric-label { color: #7f8c8d; }
        .metric-value { font-weight: bold; }
        .last-error { margin-top: 8px; font-size: 0.8em; color: #c0392b; word-break: break-word; }
        .charts-section {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(400px, 1fr));
            gap: 20px;
            margin-bottom: 20px;
        }
        .chart-title { font-size: 1.3em; font-weight: bold; margin-bottom: 15px; color: #2c3e50; text-align: center; }
        .workflow-step {
            display: flex;
            justify-content: space-between;
            align-items: center;
            padding: 10px;
            margin: 5px 0;
            border-radius: 8px;
            background: #f8f9fa;
        }
        .step-success { border-left: 4px solid #27ae60; }
        .step-failed { border-left: 4px solid #e74c3c; }
        .alert {
            padding: 10px;
            margin: 5px 0;
            border-radius: 8px;
            background: #fff3cd;
            border: 1px solid #ffeaa7;
            color: #856404;
        }
        .alert-critical { background: #f8d7da; border-color: #f5c6cb; color: #721c24; }
        .alert-normal { background: #d4edda; border-color: #c3e6cb; color: #155724; }
        .timestamp { text-align: center; color: #7f8c8d; font-size: 0.9em; margin-top: 10px; }
        .auto-refresh {
            position: fixed;
            top: 20px;
            right: 20px;
            background: rgba(255,255,255,0.9);
            padding: 10px 15px;
            border-radius: 25px;
            font-size: 0.9em;
            color: #27ae60;
            font-weight: bold;
        }
    </style>
</head>
<body>
    <div class="auto-refresh">Auto-refresh: {{refresh_seconds}}s</div>

    <div class="container">
        <div class="panel header">
            <h1>AI Tutor System Monitor</h1>
            <div class="overall overall-{{overall_health}}">Overall: {{overall_label}} ({{services_up}}/{{services_total}} services up)</div>
            <div class="timestamp">Last Updated: {{generated_at}}</div>
        </div>

        <div class="status-overview">
            {{#each cards}}
            <div class="status-card status-{{status}}">
                <div class="service-name">{{display_name}}</div>
                <div class="metric">
                    <span class="metric-label">Status:</span>
                    <span class="metric-value">{{status_label}}</span>
                </div>
                <div class="metric">
                    <span class="metric-label">Response Time:</span>
                    <span class="metric-value">{{response_time}}s</span>
                </div>
                <div class="metric">
                    <span class="metric-label">Uptime:</span>
                    <span class="metric-value">{{uptime}}%</span>
                </div>
                <div class="metric">
                    <span class="metric-label">Success/Error:</span>
                    <span class="metric-value">{{success_count}}/{{error_count}}</span>
                </div>
                {{#if last_error}}<div class="last-error">{{last_error}}</div>{{/if}}
            </div>
            {{/each}}
        </div>

        <div class="charts-section">
            <div class="panel">
                <div class="chart-title">Response Times (Last {{chart_points}} Checks)</div>
                <canvas id="responseTimeChart" width="400" height="200"></canvas>
            </div>
            <div class="panel">
                <div class="chart-title">System Performance</div>
                <canvas id="systemChart" width="400" height="200"></canvas>
            </div>
        </div>

        <div class="panel">
            <div class="chart-title">Latest End-to-End Workflow Test</div>
            {{#if workflow}}
            {{#each workflow.steps}}
            <div class="workflow-step {{css_class}}">
                <span>{{icon}} {{label}}</span>
                <span>{{duration}}s</span>
            </div>
            {{/each}}
            {{#if workflow.error_message}}<div class="alert alert-critical">{{workflow.error_message}}</div>{{/if}}
            <div class="timestamp">Total: {{workflow.total_time}}s</div>
            {{else}}
            <div class="workflow-step">No workflow data available</div>
            {{/if}}
        </div>

        <div class="panel">
            <div class="chart-title">Active Alerts</div>
            {{#each alerts}}
            <div class="alert {{css_class}}">{{message}}</div>
            {{/each}}
        </div>
    </div>

    <script>
        const responseCtx = document.getElementById('responseTimeChart').getContext('2d');
        new Chart(responseCtx, {
            type: 'line',
            data: { labels: {{{chart_labels}}}, datasets: {{{chart_datasets}}} },
            options: {
                responsive: true,
                scales: { y: { beginAtZero: true, title: { display: true, text: 'Response Time (seconds)' } } },
                plugins: { legend: { position: 'top' } }
            }
        });

        const systemCtx = document.getElementById('systemChart').getContext('2d');
        new Chart(systemCtx, {
            type: 'doughnut',
            data: {
                labels: ['CPU Usage', 'Memory Usage', 'Available'],
                datasets: [ {
                    data: [{{cpu_usage}}, {{memory_usage}}, {{available_resources}}],
                    backgroundColor: ['#e74c3c', '#f39c12', '#27ae60'],
                    borderWidth: 2,
                    borderColor: '#fff'
                } ]
            },
            options: { responsive: true, plugins: { legend: { position: 'bottom' } } }
        });

        setTimeout(() => { window.location.reload(); }, {{refresh_millis}});
    </script>
</body>
</html>
"##;

#[derive(Debug, Serialize)]
struct CardView {
    display_name: String,
    status: &'static str,
    status_label: String,
    response_time: String,
    uptime: String,
    success_count: u64,
    error_count: u64,
    last_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StepView {
    label: String,
    duration: String,
    css_class: &'static str,
    icon: &'static str,
}

#[derive(Debug, Serialize)]
struct WorkflowView {
    steps: Vec<StepView>,
    total_time: String,
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AlertView {
    css_class: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct DashboardView {
    generated_at: String,
    refresh_seconds: u64,
    refresh_millis: u64,
    overall_health: String,
    overall_label: String,
    services_up: usize,
    services_total: usize,
    cards: Vec<CardView>,
    chart_points: usize,
    chart_labels: String,
    chart_datasets: String,
    cpu_usage: String,
    memory_usage: String,
    available_resources: String,
    workflow: Option<WorkflowView>,
    alerts: Vec<AlertView>,
}

/// Where the dashboard files landed
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardPaths {
    pub html: PathBuf,
    pub json: PathBuf,
}

/// Renders the aggregate snapshot into a self-refreshing HTML page
pub struct DashboardRenderer {
    registry: Handlebars<'static>,
    output_dir: PathBuf,
    refresh: Duration,
}

impl DashboardRenderer {
    pub fn new(output_dir: PathBuf, refresh: Duration) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.register_template_string(TEMPLATE_NAME, DASHBOARD_TEMPLATE)?;

        Ok(Self {
            registry,
            output_dir,
            refresh,
        })
    }

    pub fn html_path(&self) -> PathBuf {
        self.output_dir.join(DASHBOARD_FILE)
    }

    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(LATEST_METRICS_FILE)
    }

    /// Render the HTML page. `response_history` pairs each service name with
    /// its recent response times, oldest first, in display order. Cards and
    /// chart series follow that order.
    pub fn render_html(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: &[Alert],
        response_history: &[(String, Vec<f64>)],
    ) -> Result<String> {
        let view = self.build_view(snapshot, alerts, response_history);
        Ok(self.registry.render(TEMPLATE_NAME, &view)?)
    }

    pub fn render_json(&self, snapshot: &MetricsSnapshot) -> Result<String> {
        Ok(serde_json::to_string_pretty(snapshot)?)
    }

    /// Render both files and replace the previous ones in place
    pub async fn write(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: &[Alert],
        response_history: &[(String, Vec<f64>)],
    ) -> Result<DashboardPaths> {
        let html = self.render_html(snapshot, alerts, response_history)?;
        let json = self.render_json(snapshot)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;

        let paths = DashboardPaths {
            html: self.html_path(),
            json: self.json_path(),
        };
        replace_file(&paths.html, html.as_bytes()).await?;
        replace_file(&paths.json, json.as_bytes()).await?;

        debug!("Dashboard written to {} and {}", paths.html.display(), paths.json.display());
        Ok(paths)
    }

    fn build_view(
        &self,
        snapshot: &MetricsSnapshot,
        alerts: &[Alert],
        response_history: &[(String, Vec<f64>)],
    ) -> DashboardView {
        let services = display_order(snapshot, response_history);

        let cards = services
            .iter()
            .map(|&(name, metrics)| CardView {
                display_name: display_name(name),
                status: metrics.status.as_str(),
                status_label: metrics.status.as_str().to_uppercase(),
                response_time: format!("{:.2}", metrics.response_time),
                uptime: format!("{:.1}", metrics.uptime_percentage),
                success_count: metrics.success_count,
                error_count: metrics.error_count,
                last_error: metrics
                    .last_error
                    .clone()
                    .filter(|_| metrics.status != ServiceStatus::Healthy),
            })
            .collect();

        let (chart_labels, chart_datasets) = chart_data(&services, response_history);

        let (cpu_usage, memory_usage) = snapshot
            .system
            .as_ref()
            .map(|s| (s.cpu_usage, s.memory_usage))
            .unwrap_or((0.0, 0.0));
        let available_resources = (100.0 - cpu_usage.max(memory_usage)).max(0.0);

        let workflow = snapshot.workflows.last().map(|workflow| WorkflowView {
            steps: workflow
                .steps
                .iter()
                .map(|step| StepView {
                    label: display_name(&step.name),
                    duration: format!("{:.2}", step.duration),
                    css_class: if step.success { "step-success" } else { "step-failed" },
                    icon: if step.success { "\u{2705}" } else { "\u{274c}" },
                })
                .collect(),
            total_time: format!("{:.2}", workflow.total_time),
            error_message: workflow.error_message.clone(),
        });

        let mut alert_views: Vec<AlertView> = alerts
            .iter()
            .map(|alert| AlertView {
                css_class: if alert.is_critical() { "alert-critical" } else { "" },
                message: alert.message.clone(),
            })
            .collect();
        if alert_views.is_empty() {
            alert_views.push(AlertView {
                css_class: "alert-normal",
                message: ALL_NORMAL.to_string(),
            });
        }

        let overall = snapshot.summary.overall_health.to_string();

        DashboardView {
            generated_at: snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            refresh_seconds: self.refresh.as_secs(),
            refresh_millis: self.refresh.as_millis() as u64,
            overall_label: overall.to_uppercase(),
            overall_health: overall,
            services_up: snapshot.summary.services_up,
            services_total: snapshot.summary.services_total,
            cards,
            chart_points: CHART_POINTS,
            chart_labels,
            chart_datasets,
            cpu_usage: format!("{:.1}", cpu_usage),
            memory_usage: format!("{:.1}", memory_usage),
            available_resources: format!("{:.1}", available_resources),
            workflow,
            alerts: alert_views,
        }
    }
}

/// Snapshot services in the order of `response_history`, followed by any
/// the history does not mention, by name
fn display_order<'a>(
    snapshot: &'a MetricsSnapshot,
    response_history: &'a [(String, Vec<f64>)],
) -> Vec<(&'a str, &'a ServiceMetrics)> {
    let mut ordered: Vec<(&str, &ServiceMetrics)> = response_history
        .iter()
        .filter_map(|(name, _)| {
            snapshot
                .services
                .get_key_value(name)
                .map(|(name, metrics)| (name.as_str(), metrics))
        })
        .collect();

    for (name, metrics) in &snapshot.services {
        if !response_history.iter().any(|(listed, _)| listed == name) {
            ordered.push((name.as_str(), metrics));
        }
    }

    ordered
}

/// Chart.js labels and datasets as JSON text, one dataset per service with
/// its colour fixed by position
fn chart_data(
    services: &[(&str, &ServiceMetrics)],
    response_history: &[(String, Vec<f64>)],
) -> (String, String) {
    let points = response_history
        .iter()
        .map(|(_, history)| history.len().min(CHART_POINTS))
        .max()
        .unwrap_or(0);
    let labels: Vec<String> = (1..=points).map(|i| format!("Check {}", i)).collect();

    let datasets: Vec<serde_json::Value> = services
        .iter()
        .enumerate()
        .map(|(index, &(name, _))| {
            let history = response_history
                .iter()
                .find(|(listed, _)| listed == name)
                .map(|(_, history)| history.as_slice())
                .unwrap_or(&[]);
            let data = &history[history.len().saturating_sub(CHART_POINTS)..];
            let color = CHART_COLORS.get(index).copied().unwrap_or(FALLBACK_COLOR);
            json!({
                "label": display_name(name),
                "data": data,
                "borderColor": color,
                "backgroundColor": format!("{}20", color),
                "tension": 0.4,
                "fill": false,
            })
        })
        .collect();

    (
        serde_json::to_string(&labels).unwrap_or_else(|_| "[]".to_string()),
        serde_json::to_string(&datasets).unwrap_or_else(|_| "[]".to_string()),
    )
}

/// `api_gateway` -> `Api Gateway`
pub fn display_name(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Write next to `path` and rename over it so readers never see a partial file
async fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
