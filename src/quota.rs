//! Language-model quota check against the inference service

use crate::errors::Result;
use crate::probe::build_client;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuotaState {
    Healthy,
    QuotaExceeded,
    Error,
}

impl std::fmt::Display for QuotaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaState::Healthy => write!(f, "healthy"),
            QuotaState::QuotaExceeded => write!(f, "quota_exceeded"),
            QuotaState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaStatus {
    pub status: QuotaState,
    /// Seconds; zero when no response arrived
    pub response_time: f64,
    pub quota_exceeded: bool,
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QuotaProbe {
    client: Client,
    timeout: Duration,
    chat_url: String,
}

impl QuotaProbe {
    pub fn new(chat_url: String, http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(http_timeout)?,
            timeout: http_timeout,
            chat_url,
        })
    }

    pub async fn check(&self) -> QuotaStatus {
        let start = Instant::now();
        let request = self
            .client
            .post(&self.chat_url)
            .json(&json!({ "message": "Test quota check", "subject": "general" }))
            .send();

        let (status, response_time, error) = match timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let elapsed = start.elapsed().as_secs_f64();
                match response.status().as_u16() {
                    200 => (QuotaState::Healthy, elapsed, None),
                    429 => (QuotaState::QuotaExceeded, elapsed, None),
                    code => (QuotaState::Error, elapsed, Some(format!("HTTP {}", code))),
                }
            }
            Ok(Err(e)) => (QuotaState::Error, 0.0, Some(e.to_string())),
            Err(_) => (QuotaState::Error, 0.0, Some("Request timed out".to_string())),
        };

        QuotaStatus {
            status,
            response_time,
            quota_exceeded: status == QuotaState::QuotaExceeded,
            error,
            last_check: Utc::now(),
        }
    }
}
