//! HTTP client for the job API.
//!
//! Only the status endpoint is needed: watchers poll it when the
//! WebSocket is down or a completion event may have been missed.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Status label the API reports for a finished job.
pub const STATUS_READY: &str = "READY";

/// Body of `GET /api/scripts/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStatus {
    /// Script/job identifier.
    pub id: String,
    /// Backend status label (`PROCESSING`, `READY`, ...).
    pub status: String,
    /// Final script text, once ready.
    #[serde(default)]
    pub script_text: Option<String>,
    /// Narration audio location, once ready.
    #[serde(default)]
    pub audio_url: Option<String>,
    /// Generated images; `null` and absent both mean none.
    #[serde(default)]
    pub image_urls: Option<Vec<String>>,
}

impl ScriptStatus {
    /// Whether the job has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == STATUS_READY
    }
}

/// API client for the job backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a new API client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates an API client with a pre-configured HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current status of script/job `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status, or the body cannot be decoded.
    pub async fn script_status(&self, id: &str) -> Result<ScriptStatus> {
        let url = format!("{}/api/scripts/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch status for {id}"))?;

        if !response.status().is_success() {
            anyhow::bail!("Status request for {} failed: {}", id, response.status());
        }

        response
            .json::<ScriptStatus>()
            .await
            .with_context(|| format!("Failed to parse status for {id}"))
    }
}
