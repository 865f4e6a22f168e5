//! REST collaborator for the processing endpoints.
//!
//! [`StatusApi`] is the seam the sync core calls for snapshots and
//! start/stop commands; [`HttpStatusApi`] implements it over
//! [`reqwest`].

use async_trait::async_trait;
use briefing_core::JobState;
use serde::{Deserialize, Serialize};

/// Request/response side of the backend.
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// `GET /process/status`: authoritative snapshot.
    async fn get_status(&self) -> Result<JobState, ApiError>;

    /// `POST /process/start`.
    async fn start(&self, options: &StartOptions) -> Result<StartAck, ApiError>;

    /// `POST /process/stop`.
    async fn stop(&self) -> Result<StopAck, ApiError>;
}

/// Body of `POST /process/start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartOptions {
    /// Reprocess items that were already summarized.
    pub force_reprocess: bool,
    /// Cap on items processed in this run.
    pub max_items: Option<u32>,
}

/// Answer to a start request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StartAck {
    pub message: String,
    /// `"started"`, or `"running"` when a run was already in progress.
    pub status: String,
    pub websocket_url: Option<String>,
    pub current_step: Option<String>,
    pub progress: Option<u32>,
}

impl StartAck {
    pub fn is_already_running(&self) -> bool {
        self.status == "running"
    }
}

/// Answer to a stop request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StopAck {
    pub message: String,
    pub note: Option<String>,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body is not the expected JSON.
    #[error("Undecodable response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP client for the processing endpoints of one backend.
pub struct HttpStatusApi {
    client: reqwest::Client,
    api_url: String,
}

impl HttpStatusApi {
    /// * `api_url` - REST base, e.g. `http://host:8000/api/v1`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Reuse an existing [`reqwest::Client`] and its connection pool.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/process/{path}", self.api_url)
    }

    // ---- private helpers ----

    /// Pass a 2xx response through; turn anything else into
    /// [`ApiError::ApiError`] with the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl StatusApi for HttpStatusApi {
    async fn get_status(&self) -> Result<JobState, ApiError> {
        let response = self.client.get(self.endpoint("status")).send().await?;
        Self::parse_response(response).await
    }

    async fn start(&self, options: &StartOptions) -> Result<StartAck, ApiError> {
        let response = self
            .client
            .post(self.endpoint("start"))
            .json(options)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn stop(&self) -> Result<StopAck, ApiError> {
        let response = self.client.post(self.endpoint("stop")).send().await?;
        Self::parse_response(response).await
    }
}
