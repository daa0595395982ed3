use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::CapabilityId;

/// Media kinds a capability can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Text,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Text => "text",
        })
    }
}

/// What a capability produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Image,
    Video,
}

/// Closed capability taxonomy used for grouping in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Repair,
    Structure,
    Style,
    Dynamic,
}

/// Provider backend servicing a capability.
///
/// Some capabilities can be served by more than one backend; the choice is
/// always explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// The hosted generation API.
    #[default]
    Managed,
    /// A ComfyUI workflow graph executed by the task service.
    Comfy,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Managed => "managed",
            Backend::Comfy => "comfy",
        }
    }
}

/// Where an input's bytes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// A local binary that still has to be uploaded.
    Local {
        file_name: String,
        content_type: String,
        #[serde(skip)]
        data: Arc<Vec<u8>>,
    },
    /// A URL already hosted, e.g. the thumbnail of an existing graph node.
    Hosted { url: String },
}

/// One user-supplied input. Its position in the containing list is
/// significant for multi-input capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputReference {
    pub id: String,
    pub media_type: MediaType,
    pub role: Option<String>,
    pub source: InputSource,
}

impl InputReference {
    /// A local file awaiting upload.
    pub fn local(
        media_type: MediaType,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            media_type,
            role: None,
            source: InputSource::Local {
                file_name: file_name.into(),
                content_type: content_type.into(),
                data: Arc::new(data),
            },
        }
    }

    /// An already hosted asset.
    pub fn hosted(media_type: MediaType, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            media_type,
            role: None,
            source: InputSource::Hosted { url: url.into() },
        }
    }

    /// Tag the input with a capability role such as `scene` or `face`.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Whether this input carries something that can become a URL.
    pub fn is_resolvable(&self) -> bool {
        match &self.source {
            InputSource::Local { data, .. } => !data.is_empty(),
            InputSource::Hosted { url } => !url.trim().is_empty(),
        }
    }
}

/// An input after upload: always a hosted URL, order preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedInput {
    pub input_id: String,
    pub media_type: MediaType,
    pub role: Option<String>,
    pub url: String,
}

/// Transition settings between keyframes of a multi-image video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSettings {
    pub style: String,
    pub duration_ms: u32,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            style: "crossfade".to_string(),
            duration_ms: 500,
        }
    }
}

/// Parameter snapshot for one generation. Common fields are typed;
/// capability-specific settings live in `extras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationParams {
    pub duration_secs: u32,
    pub aspect_ratio: String,
    pub quality: String,
    pub mode: Option<String>,
    /// Negative means "pick one at build time".
    pub seed: i64,
    pub transition: TransitionSettings,
    pub extras: Map<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            aspect_ratio: "16:9".to_string(),
            quality: "standard".to_string(),
            mode: None,
            seed: -1,
            transition: TransitionSettings::default(),
            extras: Map::new(),
        }
    }
}

impl GenerationParams {
    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = ratio.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_transition(mut self, style: impl Into<String>, duration_ms: u32) -> Self {
        self.transition = TransitionSettings {
            style: style.into(),
            duration_ms,
        };
        self
    }

    /// Set a capability-specific extra (intensity, garment type, ...).
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

/// Opaque identifier assigned by the task service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a node in the external graph model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle as reported by the task service.
///
/// `SubStatus` carries capability-specific labels ("swapping",
/// "broadcasting") and behaves exactly like `Processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TaskStatus {
    Pending,
    Processing,
    SubStatus(String),
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Parse a service status string. Unknown labels become sub-statuses.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "pending" | "queued" | "submitted" => TaskStatus::Pending,
            "processing" | "running" | "in_progress" => TaskStatus::Processing,
            "completed" | "succeeded" | "success" => TaskStatus::Completed,
            "failed" | "error" => TaskStatus::Failed,
            "cancelled" | "canceled" => TaskStatus::Cancelled,
            _ => TaskStatus::SubStatus(normalized),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::SubStatus(label) => label,
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// True for `Processing` and every sub-status.
    pub fn is_processing(&self) -> bool {
        matches!(self, TaskStatus::Processing | TaskStatus::SubStatus(_))
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.label().to_string()
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        TaskStatus::parse(&s)
    }
}

/// The asynchronous unit of work tracked by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    pub id: TaskId,
    pub capability_id: Option<CapabilityId>,
    pub status: TaskStatus,
    pub progress: u8,
    pub status_message: Option<String>,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
}

impl GenerationTask {
    /// A freshly submitted task, not yet observed.
    pub fn pending(id: TaskId, capability_id: CapabilityId) -> Self {
        Self {
            id,
            capability_id: Some(capability_id),
            status: TaskStatus::Pending,
            progress: 0,
            status_message: None,
            output_url: None,
            error_message: None,
        }
    }
}

/// A validated, resolved request. Immutable once built; the payload
/// snapshot is exactly what was sent to the task service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub capability_id: CapabilityId,
    pub backend: Backend,
    pub inputs: Vec<InputReference>,
    pub resolved: Vec<ResolvedInput>,
    pub params: GenerationParams,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub payload_snapshot: Value,
}

impl GenerationRequest {
    /// Resolved URLs in submission order.
    pub fn urls(&self) -> Vec<&str> {
        self.resolved.iter().map(|r| r.url.as_str()).collect()
    }
}

/// Optimistic graph entry created at submission time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderNode {
    pub node_id: NodeId,
    pub task_id: TaskId,
    pub capability_id: CapabilityId,
    pub inputs: Vec<InputReference>,
    pub payload_snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// Last-used parameters for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub capability_id: CapabilityId,
    pub params: GenerationParams,
    pub updated_at: DateTime<Utc>,
}
