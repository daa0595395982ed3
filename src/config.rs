use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Configuration for the dispatch engine.
///
/// Use [`EngineConfig::builder()`] for ergonomic construction, or load it
/// from JSON (durations are given in milliseconds):
///
/// ```
/// use generation_dispatch::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(
///     r#"{ "apiEndpoint": "https://api.example.com", "pollIntervalMs": 5000 }"#,
/// ).unwrap();
/// assert_eq!(config.poll_interval.as_secs(), 5);
/// assert_eq!(config.max_poll_attempts, 120);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Base URL of the task service.
    pub api_endpoint: String,

    /// Base URL for uploads. `None` = same as `api_endpoint`.
    pub upload_endpoint: Option<String>,

    /// Delay between status fetches for one task.
    #[serde(rename = "pollIntervalMs", with = "millis")]
    pub poll_interval: Duration,

    /// Status fetches before a task is declared timed out.
    pub max_poll_attempts: u32,

    #[serde(rename = "submitTimeoutMs", with = "millis")]
    pub submit_timeout: Duration,

    #[serde(rename = "statusTimeoutMs", with = "millis")]
    pub status_timeout: Duration,

    #[serde(rename = "uploadTimeoutMs", with = "millis")]
    pub upload_timeout: Duration,

    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,

    /// Key namespace presets are stored under.
    pub preset_namespace: String,

    /// Path to the SQLite preset database. `None` = in-memory presets.
    pub preset_db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "http://127.0.0.1:8080".to_string(),
            upload_endpoint: None,
            poll_interval: Duration::from_secs(3),
            max_poll_attempts: 120,
            submit_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(120),
            event_capacity: 256,
            preset_namespace: "presets".to_string(),
            preset_db_path: None,
        }
    }
}

impl EngineConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Upload base URL, falling back to the API endpoint.
    pub fn upload_endpoint(&self) -> &str {
        self.upload_endpoint
            .as_deref()
            .unwrap_or(&self.api_endpoint)
    }

    /// Longest a task can be polled before timing out.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_endpoint.trim().is_empty() {
            return Err(DispatchError::InvalidConfig("api_endpoint is empty".into()));
        }
        if matches!(&self.upload_endpoint, Some(u) if u.trim().is_empty()) {
            return Err(DispatchError::InvalidConfig("upload_endpoint is empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(DispatchError::InvalidConfig("max_poll_attempts must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(DispatchError::InvalidConfig("event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.api_endpoint = endpoint.into();
        self
    }

    pub fn with_upload_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.upload_endpoint = Some(endpoint.into());
        self
    }

    /// Set the delay between status fetches.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set how many fetches a task gets before it times out.
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.max_poll_attempts = attempts;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.config.submit_timeout = timeout;
        self
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.config.status_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn with_preset_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.preset_namespace = namespace.into();
        self
    }

    /// Persist presets to a SQLite file. Omit for in-memory presets.
    pub fn with_preset_db_path(mut self, path: PathBuf) -> Self {
        self.config.preset_db_path = Some(path);
        self
    }

    /// Build the final [`EngineConfig`].
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
