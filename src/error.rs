use thiserror::Error;

use crate::types::MediaType;

/// User-correctable input problems, reported before anything touches the
/// network. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{capability} is not available right now")]
    CapabilityUnavailable { capability: String },

    #[error("At least {needed} input(s) required")]
    InsufficientInputs { needed: usize },

    #[error("Missing required input for role '{role}'")]
    MissingRole { role: String },

    #[error("A motion reference video is required")]
    MissingMotionReference,

    #[error("A prompt is required")]
    PromptRequired,

    #[error("At most {max} input(s) allowed")]
    TooManyInputs { max: usize },

    #[error("{media_type} inputs are not supported by this capability")]
    UnsupportedMediaType { media_type: MediaType },
}

/// Upload of a local input failed. The message is meant for direct display.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload of {file_name} failed with HTTP {status}: {body}")]
    Http {
        file_name: String,
        status: u16,
        body: String,
    },

    #[error("Upload of {file_name} failed: {message}")]
    Transport { file_name: String, message: String },

    #[error("Upload response was invalid: {0}")]
    InvalidResponse(String),
}

/// A payload could not be built. Raised before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot build payload: {reason}")]
pub struct BuildError {
    pub reason: String,
}

impl BuildError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Submission was rejected or never reached the task service. No task
/// exists, so there is nothing to reconcile.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Task service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Rejected(String),
}

/// A single status fetch failed. The poller absorbs these as skipped ticks.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Task service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Preset persistence failures.
#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Preset storage error: {0}")]
    Storage(String),

    #[error("Preset serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for PresetError {
    fn from(err: anyhow::Error) -> Self {
        PresetError::Storage(format!("{:#}", err))
    }
}

/// Top-level error returned by the engine facade.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown capability: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid capability catalog: {0}")]
    InvalidCatalog(String),

    #[error("Engine has shut down")]
    Shutdown,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DispatchError>;
