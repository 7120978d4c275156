//! Synthetic end-to-end transaction through the tutoring stack
//!
//! The probe asks the inference service a trivial question directly, asks the
//! gateway the same question, then checks that the gateway's answer carries
//! the section markers of a structured educational response.

use crate::config::WorkflowConfig;
use crate::errors::{MonitorError, Result};
use crate::metrics::{WorkflowMetrics, WorkflowStep};
use crate::probe::build_client;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

pub const INFERENCE_STEP: &str = "inference_direct_test";
pub const GATEWAY_STEP: &str = "gateway_api_test";
pub const STRUCTURE_STEP: &str = "educational_structure_check";

/// Section headers a structured answer is expected to contain at least one of
pub const STRUCTURE_MARKERS: &[&str] = &["Problem Analysis", "Step-by-Step", "Solution", "Difficulty"];

/// The two fields of a gateway chat reply the probe looks at
#[derive(Debug, Default, Deserialize)]
struct GatewayReply {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    enhanced: bool,
}

pub fn has_structured_answer(text: &str) -> bool {
    STRUCTURE_MARKERS.iter().any(|marker| text.contains(marker))
}

#[derive(Debug, Clone)]
pub struct WorkflowProbe {
    client: Client,
    timeout: Duration,
    config: WorkflowConfig,
}

impl WorkflowProbe {
    pub fn new(config: WorkflowConfig, http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(http_timeout)?,
            timeout: http_timeout,
            config,
        })
    }

    /// Run the three steps. Never fails; a step that cannot complete ends the
    /// run with `success = false` and the reason in `error_message`.
    pub async fn run(&self) -> WorkflowMetrics {
        let started = Instant::now();
        let mut steps = Vec::with_capacity(3);

        match self.execute(&mut steps).await {
            Ok(()) => WorkflowMetrics::completed(
                &self.config.workflow_name,
                steps,
                started.elapsed().as_secs_f64(),
            ),
            Err(e) => {
                warn!("Workflow {} aborted after {} steps: {}", self.config.workflow_name, steps.len(), e);
                WorkflowMetrics::aborted(
                    &self.config.workflow_name,
                    steps,
                    started.elapsed().as_secs_f64(),
                    e.to_string(),
                )
            }
        }
    }

    async fn execute(&self, steps: &mut Vec<WorkflowStep>) -> Result<()> {
        let question = self.config.question.as_str();

        let step_start = Instant::now();
        let response = self
            .post(
                &self.config.inference_chat_url(),
                json!({ "message": question, "subject": "math" }),
            )
            .await?;
        let status = response.status().as_u16();
        steps.push(WorkflowStep::new(
            INFERENCE_STEP,
            step_start.elapsed().as_secs_f64(),
            status == 200,
            format!("Status: {}", status),
        ));

        let step_start = Instant::now();
        let response = self
            .post(
                &self.config.gateway_chat_url(),
                json!({ "message": question, "files": [] }),
            )
            .await?;
        let status = response.status().as_u16();
        let duration = step_start.elapsed().as_secs_f64();
        let reply = if status == 200 {
            Some(response.json::<GatewayReply>().await?)
        } else {
            None
        };
        let enhanced = reply.as_ref().is_some_and(|r| r.enhanced);
        steps.push(WorkflowStep::new(
            GATEWAY_STEP,
            duration,
            status == 200,
            format!("Status: {}, Enhanced: {}", status, enhanced),
        ));

        let step_start = Instant::now();
        let structured = reply
            .as_ref()
            .and_then(|r| r.response.as_deref())
            .is_some_and(has_structured_answer);
        steps.push(WorkflowStep::new(
            STRUCTURE_STEP,
            step_start.elapsed().as_secs_f64(),
            structured,
            format!("Educational structure detected: {}", structured),
        ));

        debug!("Workflow steps: {:?}", steps);
        Ok(())
    }

    async fn post(&self, url: &str, body: Value) -> Result<Response> {
        timeout(self.timeout, self.client.post(url).json(&body).send())
            .await
            .map_err(|_| MonitorError::Probe(format!("Request to {} timed out", url)))?
            .map_err(MonitorError::Http)
    }
}
