//! # generation-dispatch
//!
//! Capability dispatch and task reconciliation for generative media
//! workflows.
//!
//! A user picks one of a fixed catalog of capabilities (text to video, face
//! swap, relight, upscale, ...), attaches inputs and parameters, and submits.
//! The engine validates the inputs against the catalog, uploads local files,
//! builds the capability's provider payload, submits it, drops an optimistic
//! placeholder into the host's graph, and polls the task until the
//! placeholder can be upgraded, marked failed, or removed.
//!
//! ## Features
//!
//! - 13 built-in capabilities with cardinality, media-type and role rules
//! - Managed API or ComfyUI workflow payloads for dual-backend capabilities
//! - Cancellable per-task polling owned by UI surfaces
//! - Exactly-once placeholder reconciliation through a single owner task
//! - Per-capability parameter presets (in-memory or SQLite)
//!
//! ## Quick Start
//!
//! ```no_run
//! use generation_dispatch::{
//!     CapabilityId, DispatchEngine, EngineConfig, EngineEvent, InputReference, MediaType,
//!     Submission,
//! };
//!
//! # async fn example() -> generation_dispatch::Result<()> {
//! let config = EngineConfig::builder()
//!     .with_api_endpoint("https://api.example.com")
//!     .build();
//! let engine = DispatchEngine::builder(config).build()?;
//! let mut events = engine.subscribe();
//!
//! let surface = engine.open_surface();
//! let submitted = engine
//!     .submit(
//!         Submission::new(CapabilityId::ImageToVideo)
//!             .with_inputs(vec![InputReference::hosted(MediaType::Image, "https://cdn/cat.png")])
//!             .on_surface(&surface),
//!     )
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if event.task_id() == &submitted.task.id && event.is_terminal() {
//!         println!("{:?}", event);
//!         break;
//!     }
//! }
//! engine.close_surface(&surface);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! See the `demos/` directory for a complete run against scripted services.

pub mod capability;
pub mod client;
pub mod comfy;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod payload;
pub mod poller;
pub mod presets;
pub mod reconcile;
pub mod resolver;
pub mod types;
pub mod validate;

pub use capability::{
    CapabilityDefinition, CapabilityFilter, CapabilityId, CapabilityRegistry, InputRole,
};
pub use client::{HttpTaskClient, HttpUploader, TaskService};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{
    CapabilitySelection, DispatchEngine, DispatchEngineBuilder, Submission, SubmittedTask,
    SurfaceId,
};
pub use error::{
    BuildError, DispatchError, FetchError, PresetError, Result, SubmitError, UploadError,
    ValidationError,
};
pub use events::EngineEvent;
pub use payload::ProviderPayload;
pub use poller::{PollMachine, PollOutcome, PollPhase, ProgressUpdate, TaskPoller};
pub use presets::{MemoryBackend, PresetBackend, PresetStore, SqliteBackend};
pub use reconcile::{GraphModel, GraphNode, GraphOp, MemoryGraph, NodePatch, NodeSpec, PlaceholderState};
pub use resolver::{InputResolver, InputSet, Uploader};
pub use types::{
    Backend, CapabilityCategory, GenerationParams, GenerationRequest, GenerationTask,
    InputReference, InputSource, MediaType, NodeId, OutputType, PlaceholderNode, Preset,
    ResolvedInput, TaskId, TaskStatus, TransitionSettings,
};
pub use validate::validate;
