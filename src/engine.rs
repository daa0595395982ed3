use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityDefinition, CapabilityFilter, CapabilityId, CapabilityRegistry};
use crate::client::{HttpTaskClient, HttpUploader, TaskService};
use crate::config::EngineConfig;
use crate::error::{DispatchError, Result};
use crate::events::EngineEvent;
use crate::payload;
use crate::poller::{PollOutcome, TaskPoller};
use crate::presets::{MemoryBackend, PresetStore, SqliteBackend};
use crate::reconcile::{
    spawn_reconciler, GraphModel, MemoryGraph, PlaceholderState, ReconcileCommand, Reconciler,
};
use crate::resolver::{InputResolver, Uploader};
use crate::types::{
    Backend, GenerationParams, GenerationRequest, GenerationTask, InputReference,
    PlaceholderNode, Preset, TaskId,
};
use crate::validate;

/// Identifies a UI surface (modal, sidebar, background submitter) that owns
/// poll loops. Closing it stops all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A capability chosen in the UI, with the parameters to show for it.
#[derive(Debug, Clone)]
pub struct CapabilitySelection {
    pub definition: CapabilityDefinition,
    pub params: GenerationParams,
    /// Whether `params` came from a saved preset.
    pub from_preset: bool,
}

/// Everything needed to dispatch one generation.
#[derive(Debug, Clone)]
pub struct Submission {
    pub capability_id: CapabilityId,
    pub backend: Backend,
    pub inputs: Vec<InputReference>,
    /// `None` = the capability's saved preset, or defaults.
    pub params: Option<GenerationParams>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    /// Surface that owns the poll loop. `None` = the engine itself.
    pub surface: Option<SurfaceId>,
}

impl Submission {
    pub fn new(capability_id: CapabilityId) -> Self {
        Self {
            capability_id,
            backend: Backend::default(),
            inputs: Vec::new(),
            params: None,
            prompt: None,
            negative_prompt: None,
            surface: None,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<InputReference>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_negative_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(prompt.into());
        self
    }

    pub fn on_surface(mut self, surface: &SurfaceId) -> Self {
        self.surface = Some(surface.clone());
        self
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub task: GenerationTask,
    pub placeholder: PlaceholderNode,
    pub request: GenerationRequest,
}

/// Builder for [`DispatchEngine`]. Collaborators left unset fall back to
/// the HTTP clients, an in-memory graph, and presets per the config.
pub struct DispatchEngineBuilder {
    config: EngineConfig,
    registry: Option<CapabilityRegistry>,
    service: Option<Arc<dyn TaskService>>,
    uploader: Option<Arc<dyn Uploader>>,
    graph: Option<Box<dyn GraphModel>>,
    presets: Option<PresetStore>,
}

impl DispatchEngineBuilder {
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_task_service(mut self, service: Arc<dyn TaskService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_graph(mut self, graph: impl GraphModel + 'static) -> Self {
        self.graph = Some(Box::new(graph));
        self
    }

    pub fn with_preset_store(mut self, presets: PresetStore) -> Self {
        self.presets = Some(presets);
        self
    }

    /// Validate the config and start the reconciler. Must be called inside
    /// a Tokio runtime.
    pub fn build(self) -> Result<DispatchEngine> {
        let config = self.config;
        config.validate()?;

        let presets = match self.presets {
            Some(store) => store,
            None => match &config.preset_db_path {
                Some(path) => PresetStore::new(
                    SqliteBackend::open(Some(path.as_path()))?,
                    config.preset_namespace.clone(),
                ),
                None => PresetStore::new(MemoryBackend::new(), config.preset_namespace.clone()),
            },
        };
        let service = self
            .service
            .unwrap_or_else(|| Arc::new(HttpTaskClient::from_config(&config)) as Arc<dyn TaskService>);
        let uploader = self
            .uploader
            .unwrap_or_else(|| Arc::new(HttpUploader::from_config(&config)) as Arc<dyn Uploader>);
        let graph = self
            .graph
            .unwrap_or_else(|| Box::new(MemoryGraph::new()) as Box<dyn GraphModel>);

        let (events, _) = broadcast::channel(config.event_capacity);
        let (commands, command_rx) = mpsc::channel(config.event_capacity);
        let reconciler = spawn_reconciler(Reconciler::new(graph, events.clone()), command_rx);
        let poller = TaskPoller::new(
            Arc::clone(&service),
            config.poll_interval,
            config.max_poll_attempts,
            commands.clone(),
        );

        tracing::info!(
            endpoint = %config.api_endpoint,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            max_poll_attempts = config.max_poll_attempts,
            "Dispatch engine started"
        );

        Ok(DispatchEngine {
            registry: self.registry.unwrap_or_default(),
            resolver: InputResolver::new(uploader),
            service,
            presets,
            poller,
            commands,
            events,
            root: CancellationToken::new(),
            surfaces: Mutex::new(HashMap::new()),
            polls: Mutex::new(Vec::new()),
            reconciler,
            config,
        })
    }
}

/// Entry point: validates, resolves, builds, submits, and tracks
/// generations until their placeholders settle.
pub struct DispatchEngine {
    config: EngineConfig,
    registry: CapabilityRegistry,
    resolver: InputResolver,
    service: Arc<dyn TaskService>,
    presets: PresetStore,
    poller: TaskPoller,
    commands: mpsc::Sender<ReconcileCommand>,
    events: broadcast::Sender<EngineEvent>,
    root: CancellationToken,
    surfaces: Mutex<HashMap<SurfaceId, CancellationToken>>,
    polls: Mutex<Vec<JoinHandle<Option<PollOutcome>>>>,
    reconciler: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl DispatchEngine {
    pub fn builder(config: EngineConfig) -> DispatchEngineBuilder {
        DispatchEngineBuilder {
            config,
            registry: None,
            service: None,
            uploader: None,
            graph: None,
            presets: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn capabilities(&self, filter: CapabilityFilter) -> Vec<&CapabilityDefinition> {
        self.registry.list(filter)
    }

    // ── Composer ────────────────────────────────────────────────────

    /// Look up a capability and the parameters to start from: its saved
    /// preset if one loads, defaults otherwise.
    pub fn select_capability(&self, id: CapabilityId) -> Result<CapabilitySelection> {
        let definition = self.registry.get(id)?.clone();
        let preset = match self.presets.load(id) {
            Ok(preset) => preset,
            Err(e) => {
                tracing::warn!(capability = %id, error = %e, "Failed to load preset, using defaults");
                None
            }
        };

        Ok(match preset {
            Some(preset) => CapabilitySelection {
                definition,
                params: preset.params,
                from_preset: true,
            },
            None => CapabilitySelection {
                definition,
                params: GenerationParams::default(),
                from_preset: false,
            },
        })
    }

    /// Persist the parameters last used for a capability.
    pub fn update_params(&self, id: CapabilityId, params: &GenerationParams) -> Result<Preset> {
        self.registry.get(id)?;
        Ok(self.presets.save(id, params)?)
    }

    pub fn validate(&self, id: CapabilityId, inputs: &[InputReference], prompt: &str) -> Result<()> {
        let definition = self.registry.get(id)?;
        validate::validate(definition, inputs, prompt)?;
        Ok(())
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Validate, upload, build and submit a generation, then start polling
    /// it. Any error returned here means no task exists and no placeholder
    /// was created.
    pub async fn submit(&self, submission: Submission) -> Result<SubmittedTask> {
        if self.root.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }
        let parent = match &submission.surface {
            Some(surface) => lock(&self.surfaces)
                .get(surface)
                .cloned()
                .ok_or_else(|| DispatchError::NotFound(format!("surface {}", surface)))?,
            None => self.root.clone(),
        };

        let capability = submission.capability_id;
        let definition = self.registry.get(capability)?;
        let prompt = submission.prompt.as_deref().unwrap_or_default();
        validate::validate(definition, &submission.inputs, prompt)?;

        let params = match submission.params {
            Some(params) => params,
            None => self.select_capability(capability)?.params,
        };

        tracing::info!(
            capability = %capability,
            backend = submission.backend.as_str(),
            inputs = submission.inputs.len(),
            "Dispatching generation"
        );

        let resolved = self.resolver.resolve(&submission.inputs).await?;
        let payload = payload::build(
            definition,
            &resolved,
            &params,
            submission.prompt.as_deref(),
            submission.negative_prompt.as_deref(),
            submission.backend,
        )?;
        let payload_snapshot = payload.snapshot();

        let task_id = self.service.submit(&payload).await?;
        tracing::info!(task_id = %task_id, capability = %capability, "Task submitted");

        let request = GenerationRequest {
            capability_id: capability,
            backend: submission.backend,
            inputs: submission.inputs,
            resolved,
            params,
            prompt: submission.prompt,
            negative_prompt: submission.negative_prompt,
            payload_snapshot,
        };

        let (reply, placeholder) = oneshot::channel();
        self.commands
            .send(ReconcileCommand::Submitted {
                request: Box::new(request.clone()),
                task_id: task_id.clone(),
                reply,
            })
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        let placeholder = placeholder.await.map_err(|_| DispatchError::Shutdown)?;

        let handle = self.poller.start(task_id.clone(), capability, &parent);
        {
            let mut polls = lock(&self.polls);
            polls.retain(|h| !h.is_finished());
            polls.push(handle);
        }

        Ok(SubmittedTask {
            task: GenerationTask::pending(task_id, capability),
            placeholder,
            request,
        })
    }

    /// Stop tracking a task. Its placeholder is removed, and the task
    /// service is asked (best effort) to stop the work.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        if !self.poller.cancel(task_id) {
            return false;
        }
        tracing::info!(task_id = %task_id, "Cancelling task");

        let service = Arc::clone(&self.service);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = service.cancel(&task_id).await {
                tracing::warn!(task_id = %task_id, error = %e, "Remote cancel failed");
            }
        });
        true
    }

    // ── Surfaces ────────────────────────────────────────────────────

    /// Register a surface. Poll loops started on it stop when it closes.
    pub fn open_surface(&self) -> SurfaceId {
        let id = SurfaceId(uuid::Uuid::new_v4().to_string());
        lock(&self.surfaces).insert(id.clone(), self.root.child_token());
        tracing::debug!(surface = %id, "Surface opened");
        id
    }

    /// Tear down a surface, cancelling every poll loop it owns.
    pub fn close_surface(&self, surface: &SurfaceId) -> bool {
        match lock(&self.surfaces).remove(surface) {
            Some(token) => {
                token.cancel();
                tracing::debug!(surface = %surface, "Surface closed");
                true
            }
            None => false,
        }
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Task ids currently being polled.
    pub fn active_polls(&self) -> Vec<TaskId> {
        self.poller.active()
    }

    /// Lifecycle state of a task's placeholder, as seen by the reconciler.
    pub async fn placeholder_state(&self, task_id: &TaskId) -> Result<Option<PlaceholderState>> {
        let (reply, state) = oneshot::channel();
        self.commands
            .send(ReconcileCommand::State {
                task_id: task_id.clone(),
                reply,
            })
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        state.await.map_err(|_| DispatchError::Shutdown)
    }

    pub async fn health(&self) -> bool {
        self.service.health().await
    }

    /// Cancel every poll loop, let the reconciler drain, and stop.
    pub async fn shutdown(self) {
        tracing::info!(active = self.poller.active().len(), "Shutting down dispatch engine");
        self.root.cancel();

        let polls: Vec<_> = lock(&self.polls).drain(..).collect();
        for handle in polls {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Poll task panicked");
            }
        }

        let DispatchEngine {
            poller,
            commands,
            reconciler,
            ..
        } = self;
        drop(poller);
        drop(commands);
        if let Err(e) = reconciler.await {
            tracing::warn!(error = %e, "Reconciler task panicked");
        }
    }
}
