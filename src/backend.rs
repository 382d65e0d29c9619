//! REST client for the control backend.
//!
//! The WebSocket channel carries jogging and telemetry; one-shot actions and
//! position queries go through these HTTP endpoints instead.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::config::Config;
use crate::protocol::{EePosition, JointPositions};

/// Body returned by the action endpoints.
///
/// Only an explicit `"success": false` counts as a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActionResponse {
    /// Whether the backend accepted the action.
    pub success: bool,
    /// Informational text, if any.
    pub message: Option<String>,
    /// Reason for a rejected action.
    pub error: Option<String>,
}

impl Default for ActionResponse {
    fn default() -> Self {
        Self {
            success: true,
            message: None,
            error: None,
        }
    }
}

/// Stored motion program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Program {
    /// Backend-assigned id, used by [`BackendClient::execute_program`].
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<ProgramStep>,
    /// Creation time (ISO 8601).
    #[serde(default)]
    pub created: Option<String>,
    /// Last modification time (ISO 8601).
    #[serde(default)]
    pub modified: Option<String>,
}

/// One step of a [`Program`]. The step payload is passed through untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgramStep {
    /// `moveJ`, `moveL`, `wait` or `io`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Step parameters.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Named pose captured on the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedPosition {
    /// Backend-assigned id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Capture time (ISO 8601).
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Joint positions at capture time.
    #[serde(default)]
    pub joint_positions: JointPositions,
    /// End-effector pose at capture time.
    #[serde(default)]
    pub ee_position: EePosition,
}

#[derive(Deserialize)]
struct ProgramList {
    programs: Vec<Program>,
}

#[derive(Deserialize)]
struct PositionList {
    positions: Vec<SavedPosition>,
}

/// HTTP client for the backend's REST surface.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    server_url: String,
}

impl BackendClient {
    /// Creates a client for `server_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(client, server_url))
    }

    /// Creates a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.server_url, config.request_timeout())
    }

    /// Creates a client with a pre-configured HTTP client.
    pub fn with_client(client: Client, server_url: &str) -> Self {
        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Current joint positions.
    pub async fn joint_positions(&self) -> Result<JointPositions> {
        self.get_json(&["api", "joint_positions"]).await
    }

    /// Current end-effector pose.
    pub async fn ee_position(&self) -> Result<EePosition> {
        self.get_json(&["api", "ee_position"]).await
    }

    /// Stop all motion immediately.
    pub async fn emergency_stop(&self) -> Result<ActionResponse> {
        self.post_action(&["api", "emergency_stop"]).await
    }

    /// Move the arm to its home pose.
    pub async fn home(&self) -> Result<ActionResponse> {
        self.post_action(&["api", "home"]).await
    }

    /// Stored programs.
    pub async fn programs(&self) -> Result<Vec<Program>> {
        let list: ProgramList = self.get_json(&["api", "programs", "programs"]).await?;
        Ok(list.programs)
    }

    /// One stored program.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no program has this id.
    pub async fn program(&self, program_id: &str) -> Result<Program> {
        let body: serde_json::Value = self
            .get_json(&["api", "programs", "programs", program_id])
            .await?;

        // Unknown ids come back as a 200 with a failure body.
        if body.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
            let reason = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("no reason given");
            anyhow::bail!("Program {program_id}: {reason}");
        }

        serde_json::from_value(body).with_context(|| format!("Invalid program {program_id}"))
    }

    /// Poses saved for use in programs.
    pub async fn saved_positions(&self) -> Result<Vec<SavedPosition>> {
        let list: PositionList = self
            .get_json(&["api", "programs", "saved_positions"])
            .await?;
        Ok(list.positions)
    }

    /// Start a stored program. Progress arrives as `program_execution` telemetry.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects the
    /// program (e.g. unknown id).
    pub async fn execute_program(&self, program_id: &str) -> Result<ActionResponse> {
        self.post_action(&["api", "programs", "programs", program_id, "execute"])
            .await
    }

    /// Backend URL for `segments`, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("Invalid server URL: {}", self.server_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Server URL cannot have a path: {}", self.server_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if !response.status().is_success() {
            anyhow::bail!("GET {} failed: {}", path, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {path}"))
    }

    async fn post_action(&self, segments: &[&str]) -> Result<ActionResponse> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        log::debug!("POST {}", url);

        let response = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/json")
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("POST {} failed: {} {}", path, status, body.trim());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {path}"))?;
        let action = match body.trim() {
            "" | "null" => ActionResponse::default(),
            text => serde_json::from_str(text)
                .with_context(|| format!("Invalid response from {path}"))?,
        };

        if !action.success {
            anyhow::bail!(
                "{} rejected: {}",
                path,
                action.error.as_deref().unwrap_or("no reason given")
            );
        }

        Ok(action)
    }
}
