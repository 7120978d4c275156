//! Configuration management for the monitor

use crate::alerts::AlertThresholds;
use crate::errors::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A monitored HTTP service and where its health endpoint lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceTarget {
    /// Stable identifier, used as the key in every output file
    pub name: String,

    pub base_url: String,

    /// Path appended to `base_url` for the health check
    pub health_path: String,
}

impl ServiceTarget {
    pub fn new(name: &str, base_url: &str, health_path: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            health_path: health_path.to_string(),
        }
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }

    /// Parse `name=url` or `name=url|/health/path`
    pub fn parse(entry: &str) -> std::result::Result<Self, String> {
        let (name, rest) = entry
            .split_once('=')
            .ok_or_else(|| format!("service entry '{}' must look like name=url", entry))?;

        let (url, path) = match rest.split_once('|') {
            Some((url, path)) => (url, path),
            None => (rest, "/health"),
        };

        Ok(Self::new(name.trim(), url.trim(), path.trim()))
    }
}

/// Endpoints and payload used by the synthetic workflow probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    pub workflow_name: String,

    /// Base URL of the inference service; the probe posts to `<url>/chat`
    pub inference_url: String,

    /// Base URL of the API gateway; the probe posts to `<url>/api/chat`
    pub gateway_url: String,

    /// Canned question sent on both calls
    pub question: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_name: "end_to_end_user_interaction".to_string(),
            inference_url: "http://localhost:8001".to_string(),
            gateway_url: "http://localhost:5000".to_string(),
            question: "What is 2+2?".to_string(),
        }
    }
}

impl WorkflowConfig {
    pub fn inference_chat_url(&self) -> String {
        format!("{}/chat", self.inference_url.trim_end_matches('/'))
    }

    pub fn gateway_chat_url(&self) -> String {
        format!("{}/api/chat", self.gateway_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Services probed every cycle, in display order
    pub services: Vec<ServiceTarget>,

    pub workflow: WorkflowConfig,

    /// Time between the end of one cycle and the start of the next
    pub check_interval: Duration,

    /// Timeout applied to every outbound request
    pub http_timeout: Duration,

    /// Persist a timestamped report every N cycles
    pub report_every: u64,

    /// Client-side reload period written into the dashboard
    pub dashboard_refresh: Duration,

    /// Maximum entries kept per history list
    pub history_limit: usize,

    /// Root directory for logs, reports and dashboards
    pub output_dir: PathBuf,

    /// Size at which the log file is rotated
    pub log_max_bytes: u64,

    /// Rotated log generations kept besides the live file
    pub log_max_files: usize,

    pub thresholds: AlertThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: vec![
                ServiceTarget::new("inference", "http://localhost:8001", "/health"),
                ServiceTarget::new("gateway", "http://localhost:5000", "/api/health"),
                ServiceTarget::new("frontend", "http://localhost:3000", "/"),
            ],
            workflow: WorkflowConfig::default(),
            check_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            report_every: 5,
            dashboard_refresh: Duration::from_secs(30),
            history_limit: 1000,
            output_dir: PathBuf::from("monitoring"),
            log_max_bytes: 10 * 1024 * 1024,
            log_max_files: 5,
            thresholds: AlertThresholds::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = env::var("INFERENCE_URL") {
            config.set_service_url("inference", &url);
            config.workflow.inference_url = url;
        }

        if let Ok(url) = env::var("GATEWAY_URL") {
            config.set_service_url("gateway", &url);
            config.workflow.gateway_url = url;
        }

        if let Ok(url) = env::var("FRONTEND_URL") {
            config.set_service_url("frontend", &url);
        }

        if let Ok(services) = env::var("MONITOR_SERVICES") {
            let services = services
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ServiceTarget::parse)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(MonitorError::Config)?;
            config.replace_services(services);
        }

        if let Some(seconds) = env_parse::<u64>("MONITOR_INTERVAL_SECONDS") {
            config.check_interval = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("HTTP_TIMEOUT_SECONDS") {
            config.http_timeout = Duration::from_secs(seconds);
        }

        if let Some(cycles) = env_parse("REPORT_EVERY_CYCLES") {
            config.report_every = cycles;
        }

        if let Some(seconds) = env_parse::<u64>("DASHBOARD_REFRESH_SECONDS") {
            config.dashboard_refresh = Duration::from_secs(seconds);
        }

        if let Some(limit) = env_parse("HISTORY_LIMIT") {
            config.history_limit = limit;
        }

        if let Ok(dir) = env::var("MONITOR_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Some(bytes) = env_parse("MONITOR_LOG_MAX_BYTES") {
            config.log_max_bytes = bytes;
        }

        if let Some(files) = env_parse("MONITOR_LOG_MAX_FILES") {
            config.log_max_files = files;
        }

        Ok(config)
    }

    /// Swap in a new service list. The workflow probe follows the entries
    /// named `inference` and `gateway` so every probe hits the same hosts.
    pub fn replace_services(&mut self, services: Vec<ServiceTarget>) {
        self.services = services;

        if let Some(inference) = self.services.iter().find(|s| s.name == "inference") {
            self.workflow.inference_url = inference.base_url.clone();
        }

        if let Some(gateway) = self.services.iter().find(|s| s.name == "gateway") {
            self.workflow.gateway_url = gateway.base_url.clone();
        }
    }

    fn set_service_url(&mut self, name: &str, url: &str) {
        if let Some(service) = self.services.iter_mut().find(|s| s.name == name) {
            service.base_url = url.trim_end_matches('/').to_string();
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir.join("reports")
    }

    pub fn dashboards_dir(&self) -> PathBuf {
        self.output_dir.join("dashboards")
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.services.is_empty() {
            return Err("at least one service must be configured".to_string());
        }

        for (index, service) in self.services.iter().enumerate() {
            if service.name.is_empty() {
                return Err(format!("service #{} has an empty name", index + 1));
            }

            if self.services[..index].iter().any(|s| s.name == service.name) {
                return Err(format!("service name '{}' is configured twice", service.name));
            }

            if !is_http_url(&service.base_url) {
                return Err(format!(
                    "service '{}' base URL must start with http:// or https://",
                    service.name
                ));
            }

            if !service.health_path.starts_with('/') {
                return Err(format!("service '{}' health path must start with '/'", service.name));
            }
        }

        if !is_http_url(&self.workflow.inference_url) || !is_http_url(&self.workflow.gateway_url) {
            return Err("workflow URLs must start with http:// or https://".to_string());
        }

        if self.check_interval.is_zero() {
            return Err("check_interval must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        if self.report_every == 0 {
            return Err("report_every must be greater than 0".to_string());
        }

        if self.history_limit < 2 {
            return Err("history_limit must keep at least 2 entries".to_string());
        }

        if self.log_max_bytes == 0 {
            return Err("log_max_bytes must be greater than 0".to_string());
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.services.len(), 3);
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.report_every, 5);
    }

    #[test]
    fn test_health_url_joins_path() {
        let target = ServiceTarget::new("gateway", "http://localhost:5000/", "/api/health");
        assert_eq!(target.health_url(), "http://localhost:5000/api/health");
    }

    #[test]
    fn test_parse_service_entry() {
        let target = ServiceTarget::parse("frontend=http://localhost:3000|/").unwrap();
        assert_eq!(target.name, "frontend");
        assert_eq!(target.base_url, "http://localhost:3000");
        assert_eq!(target.health_path, "/");

        let target = ServiceTarget::parse("inference=http://10.0.0.5:8001").unwrap();
        assert_eq!(target.health_path, "/health");

        assert!(ServiceTarget::parse("no-equals-sign").is_err());
    }

    #[test]
    fn test_validation_rejects_duplicates() {
        let mut config = Config::default();
        config.services.push(ServiceTarget::new("inference", "http://localhost:9000", "/health"));
        assert!(config.validate().unwrap_err().contains("configured twice"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.services.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.history_limit = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.services[0].base_url = "localhost:8001".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.services[0].health_path = "health".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workflow_urls() {
        let workflow = WorkflowConfig::default();
        assert_eq!(workflow.inference_chat_url(), "http://localhost:8001/chat");
        assert_eq!(workflow.gateway_chat_url(), "http://localhost:5000/api/chat");
    }

    #[test]
    fn test_replaced_services_carry_workflow_urls() {
        let mut config = Config::default();
        let services = "inference=http://10.0.0.5:8001,gateway=http://10.0.0.6:5000|/api/health"
            .split(',')
            .map(ServiceTarget::parse)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        config.replace_services(services);

        assert_eq!(config.services.len(), 2);
        assert_eq!(config.workflow.inference_chat_url(), "http://10.0.0.5:8001/chat");
        assert_eq!(config.workflow.gateway_chat_url(), "http://10.0.0.6:5000/api/chat");
        assert!(config.validate().is_ok());

        // no matching entries: workflow endpoints are left alone
        let mut config = Config::default();
        config.replace_services(vec![ServiceTarget::new("frontend", "http://10.0.0.7:3000", "/")]);
        assert_eq!(config.workflow, WorkflowConfig::default());
    }

    #[test]
    fn test_output_layout() {
        let mut config = Config::default();
        config.output_dir = PathBuf::from("/tmp/mon");
        assert_eq!(config.reports_dir(), PathBuf::from("/tmp/mon/reports"));
        assert_eq!(config.dashboards_dir(), PathBuf::from("/tmp/mon/dashboards"));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/mon/logs"));
    }
}
