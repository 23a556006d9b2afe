//! HTTP client for the hostmon control plane.
//!
//! [`HttpControlPlane`] wraps the control plane's agent-facing REST API:
//! metric reporting, heartbeats, command polling and command-result
//! reporting. The [`ControlPlane`] trait is the seam the agent's
//! orchestration loop consumes, so tests can substitute a double.

pub mod error;

pub use error::ClientError;

use async_trait::async_trait;
use hostmon_common::types::{Command, CommandOutcome, HeartbeatAck, MetricSample};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

const AGENT_TOKEN_HEADER: &str = "x-agent-token";

const REPORT_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMANDS_TIMEOUT: Duration = Duration::from_secs(10);
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The control plane operations the agent depends on.
///
/// All calls are bounded by per-call timeouts so a hung endpoint degrades a
/// single job's cadence instead of stalling the process.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Reports one combined metric sample.
    async fn report_metrics(&self, sample: &MetricSample) -> Result<(), ClientError>;

    /// Sends a liveness heartbeat and returns the server's acknowledgement,
    /// which may carry a suggested next interval.
    async fn send_heartbeat(&self) -> Result<HeartbeatAck, ClientError>;

    /// Fetches commands pending for this agent, in server order.
    async fn fetch_pending_commands(&self) -> Result<Vec<Command>, ClientError>;

    /// Reports the outcome of one executed command.
    async fn report_command_result(
        &self,
        command_id: &str,
        outcome: &CommandOutcome,
    ) -> Result<(), ClientError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandResultReport<'a> {
    command_id: &'a str,
    status: hostmon_common::types::CommandStatus,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a serde_json::Value>,
}

pub struct HttpControlPlane {
    base_url: String,
    agent_id: String,
    agent_token: String,
    client: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(server_url: &str, agent_id: &str, agent_token: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: server_url.trim_end_matches('/').to_string(),
            agent_id: agent_id.to_string(),
            agent_token: agent_token.to_string(),
            client,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.base_url, suffix)
    }

    async fn expect_status(response: Response, expected: StatusCode) -> Result<Response, ClientError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Auth);
        }
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn report_metrics(&self, sample: &MetricSample) -> Result<(), ClientError> {
        let url = self.url(&format!("/api/v1/monitoring/{}", self.agent_id));
        tracing::debug!(url = %url, "Sending monitoring data");
        let response = self
            .client
            .post(&url)
            .header(AGENT_TOKEN_HEADER, &self.agent_token)
            .timeout(REPORT_TIMEOUT)
            .json(sample)
            .send()
            .await?;
        Self::expect_status(response, StatusCode::CREATED).await?;
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<HeartbeatAck, ClientError> {
        let url = self.url(&format!("/api/v1/monitoring/{}/heartbeat", self.agent_id));
        tracing::debug!(url = %url, "Sending heartbeat");
        let response = self
            .client
            .post(&url)
            .header(AGENT_TOKEN_HEADER, &self.agent_token)
            .timeout(HEARTBEAT_TIMEOUT)
            .send()
            .await?;
        let response = Self::expect_status(response, StatusCode::OK).await?;
        let ack: HeartbeatAck = response.json().await?;
        Ok(ack)
    }

    async fn fetch_pending_commands(&self) -> Result<Vec<Command>, ClientError> {
        let url = self.url(&format!("/api/v1/agent/{}/commands", self.agent_id));
        tracing::debug!(url = %url, "Polling commands");
        let response = self
            .client
            .get(&url)
            .header(AGENT_TOKEN_HEADER, &self.agent_token)
            .timeout(COMMANDS_TIMEOUT)
            .send()
            .await?;
        let response = Self::expect_status(response, StatusCode::OK).await?;
        let commands: Vec<Command> = response.json().await?;
        Ok(commands)
    }

    async fn report_command_result(
        &self,
        command_id: &str,
        outcome: &CommandOutcome,
    ) -> Result<(), ClientError> {
        let url = self.url(&format!("/api/v1/agent/{}/command_result", self.agent_id));
        tracing::debug!(command_id = %command_id, status = %outcome.status, "Sending command result");
        let payload = CommandResultReport {
            command_id,
            status: outcome.status,
            message: &outcome.message,
            data: outcome.data.as_ref(),
        };
        let response = self
            .client
            .post(&url)
            .header(AGENT_TOKEN_HEADER, &self.agent_token)
            .timeout(RESULT_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        Self::expect_status(response, StatusCode::OK).await?;
        Ok(())
    }
}
