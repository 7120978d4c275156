//! HTTP health checks against the monitored services

use crate::config::ServiceTarget;
use crate::errors::{MonitorError, Result};
use crate::metrics::ProbeOutcome;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Outcome plus latency of one health check
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    /// Seconds
    pub response_time: f64,
}

/// Issues health-check requests with a bounded timeout
#[derive(Debug, Clone)]
pub struct ServiceProbe {
    client: Client,
    timeout: Duration,
}

impl ServiceProbe {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(http_timeout)?,
            timeout: http_timeout,
        })
    }

    /// Probe one service. Never fails: transport errors and timeouts are
    /// reported as [`ProbeOutcome::Down`].
    pub async fn check(&self, target: &ServiceTarget) -> ProbeResult {
        let url = target.health_url();
        debug!("Checking {} at {}", target.name, url);

        let start = Instant::now();
        let outcome = match timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => ProbeOutcome::from_status(response.status().as_u16()),
            Ok(Err(e)) => ProbeOutcome::Down { reason: e.to_string() },
            Err(_) => ProbeOutcome::Down {
                reason: format!("Request timed out after {:.1}s", self.timeout.as_secs_f64()),
            },
        };
        let response_time = start.elapsed().as_secs_f64();

        debug!("{} answered {:?} in {:.3}s", target.name, outcome, response_time);

        ProbeResult { outcome, response_time }
    }
}

/// Shared HTTP client setup for every probe in the crate
pub(crate) fn build_client(http_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(http_timeout)
        .user_agent(format!("tutor-monitor/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(MonitorError::Http)
}
