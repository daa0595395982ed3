use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{FetchError, SubmitError, UploadError};
use crate::payload::ProviderPayload;
use crate::resolver::Uploader;
use crate::types::{GenerationTask, TaskId, TaskStatus};

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// The remote task service.
///
/// `submit` is fire-once: it is never retried, since a retry could create a
/// duplicate paid generation. `fetch_status` is read-only and safe to repeat.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn submit(&self, payload: &ProviderPayload) -> Result<TaskId, SubmitError>;

    async fn fetch_status(&self, task_id: &TaskId) -> Result<GenerationTask, FetchError>;

    /// Best-effort remote cancellation.
    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError>;

    async fn health(&self) -> bool;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(alias = "id", alias = "task_id")]
    task_id: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(alias = "status_message")]
    status_message: Option<String>,
    #[serde(alias = "output_url")]
    output_url: Option<String>,
    #[serde(alias = "error_message")]
    error_message: Option<String>,
    /// Some services report failures under a bare `error` key.
    error: Option<String>,
}

impl StatusResponse {
    fn into_task(self, id: TaskId) -> GenerationTask {
        GenerationTask {
            id,
            capability_id: None,
            status: TaskStatus::parse(&self.status),
            progress: self
                .progress
                .map(|p| p.clamp(0.0, 100.0).round() as u8)
                .unwrap_or(0),
            status_message: self.status_message,
            output_url: self.output_url.filter(|u| !u.trim().is_empty()),
            error_message: non_blank(self.error_message).or_else(|| non_blank(self.error)),
        }
    }
}

fn non_blank(message: Option<String>) -> Option<String> {
    message.filter(|m| !m.trim().is_empty())
}

/// Async client for the generation task service.
///
/// # Example
/// ```no_run
/// use generation_dispatch::{HttpTaskClient, TaskService, TaskId};
///
/// # async fn example() {
/// let client = HttpTaskClient::new("https://api.example.com");
/// if client.health().await {
///     let task = client.fetch_status(&TaskId::new("abc")).await;
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    http: Client,
    endpoint: String,
    submit_timeout: Duration,
    status_timeout: Duration,
}

impl HttpTaskClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            submit_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.api_endpoint.clone())
            .with_timeouts(config.submit_timeout, config.status_timeout)
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS, auth headers).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn with_timeouts(mut self, submit: Duration, status: Duration) -> Self {
        self.submit_timeout = submit;
        self.status_timeout = status;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unreachable(&self) -> String {
        format!(
            "Cannot reach the task service at {}. Is it running?",
            self.endpoint
        )
    }
}

#[async_trait]
impl TaskService for HttpTaskClient {
    async fn submit(&self, payload: &ProviderPayload) -> Result<TaskId, SubmitError> {
        let url = format!("{}/generations", self.endpoint);

        let resp = self
            .http
            .post(&url)
            .timeout(self.submit_timeout)
            .json(&payload.snapshot())
            .send()
            .await
            .map_err(|e| SubmitError::Network {
                context: self.unreachable(),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmitError::Http { status, body });
        }

        let body: SubmitResponse = resp.json().await.map_err(|e| SubmitError::Network {
            context: "Failed to parse submission response".into(),
            source: e,
        })?;

        if let Some(error) = body.error.filter(|e| !e.trim().is_empty()) {
            return Err(SubmitError::Rejected(error));
        }

        body.task_id
            .filter(|id| !id.trim().is_empty())
            .map(TaskId::new)
            .ok_or_else(|| SubmitError::InvalidResponse("Submission response has no taskId".into()))
    }

    async fn fetch_status(&self, task_id: &TaskId) -> Result<GenerationTask, FetchError> {
        let url = format!("{}/generations/{}", self.endpoint, task_id);

        let resp = self
            .http
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                context: self.unreachable(),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http { status, body });
        }

        let body: StatusResponse = resp.json().await.map_err(|e| FetchError::Network {
            context: format!("Failed to parse status for task {}", task_id),
            source: e,
        })?;

        Ok(body.into_task(task_id.clone()))
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError> {
        let url = format!("{}/generations/{}/cancel", self.endpoint, task_id);

        let resp = self
            .http
            .post(&url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                context: self.unreachable(),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http { status, body });
        }
        Ok(())
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.endpoint);
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Health check failed");
                false
            }
        }
    }
}

/// Multipart uploader for local input files.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.upload_endpoint()).with_timeout(config.upload_timeout)
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Arc<Vec<u8>>,
    ) -> Result<String, UploadError> {
        let url = format!("{}/uploads", self.endpoint);
        let transport = |message: String| UploadError::Transport {
            file_name: file_name.to_string(),
            message,
        };

        let part = multipart::Part::bytes(data.as_ref().clone())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| transport(format!("invalid content type '{}': {}", content_type, e)))?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Http {
                file_name: file_name.to_string(),
                status,
                body,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

        json.get("url")
            .and_then(|v| v.as_str())
            .filter(|u| !u.trim().is_empty())
            .map(|u| u.to_string())
            .ok_or_else(|| UploadError::InvalidResponse(format!("No url for {}", file_name)))
    }
}
