//! Placeholder lifecycle in the external graph.
//!
//! The reconciler is the only code that mutates the graph. It runs as a
//! single owner task fed by [`ReconcileCommand`]s, so pollers never race
//! each other on graph writes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::capability::CapabilityId;
use crate::events::{
    EngineEvent, TaskCancelledEvent, TaskCompletedEvent, TaskFailedEvent, TaskProgressEvent,
    TaskSubmittedEvent,
};
use crate::poller::{PollOutcome, ProgressUpdate};
use crate::types::{GenerationRequest, InputReference, NodeId, PlaceholderNode, TaskId};

/// What the graph needs to draw a new placeholder.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub task_id: TaskId,
    pub capability_id: CapabilityId,
    pub inputs: Vec<InputReference>,
    pub payload_snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// A change to an existing node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePatch {
    Progress {
        status: String,
        progress: u8,
        message: Option<String>,
    },
    Completed {
        output_url: Option<String>,
    },
    Failed {
        message: String,
    },
}

/// The external graph/canvas model.
pub trait GraphModel: Send {
    fn create_placeholder_node(&mut self, spec: &NodeSpec) -> NodeId;

    fn update_node(&mut self, node_id: &NodeId, patch: NodePatch);

    fn remove_node(&mut self, node_id: &NodeId);
}

/// Where a placeholder is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderState {
    Pending,
    Upgraded,
    Failed,
    Removed,
}

impl PlaceholderState {
    fn is_settled(&self) -> bool {
        !matches!(self, PlaceholderState::Pending)
    }
}

struct Tracked {
    placeholder: PlaceholderNode,
    state: PlaceholderState,
}

/// How many settled tasks are remembered after their terminal transition.
pub const DEFAULT_SETTLED_HISTORY: usize = 1024;

/// Applies task outcomes to the graph. Every terminal transition happens at
/// most once per task.
///
/// Pending tasks are always tracked. Settled tasks are kept in a bounded
/// history so late or repeated updates for them are still ignored; once a
/// settled task falls out of the history it is treated as unknown, which
/// also leaves the graph untouched.
pub struct Reconciler {
    graph: Box<dyn GraphModel>,
    tracked: HashMap<TaskId, Tracked>,
    settled: VecDeque<TaskId>,
    settled_capacity: usize,
    events: broadcast::Sender<EngineEvent>,
}

impl Reconciler {
    pub fn new(graph: Box<dyn GraphModel>, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            graph,
            tracked: HashMap::new(),
            settled: VecDeque::new(),
            settled_capacity: DEFAULT_SETTLED_HISTORY,
            events,
        }
    }

    pub fn with_settled_history(mut self, capacity: usize) -> Self {
        self.settled_capacity = capacity.max(1);
        self
    }

    /// Number of tasks currently remembered, pending or settled.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Create the optimistic placeholder for a freshly submitted task.
    /// Re-submitting the same task id returns the existing placeholder.
    pub fn on_submitted(&mut self, request: &GenerationRequest, task_id: TaskId) -> PlaceholderNode {
        if let Some(existing) = self.tracked.get(&task_id) {
            return existing.placeholder.clone();
        }

        let spec = NodeSpec {
            task_id: task_id.clone(),
            capability_id: request.capability_id,
            inputs: request.inputs.clone(),
            payload_snapshot: request.payload_snapshot.clone(),
            created_at: Utc::now(),
        };
        let node_id = self.graph.create_placeholder_node(&spec);
        let placeholder = PlaceholderNode {
            node_id: node_id.clone(),
            task_id: task_id.clone(),
            capability_id: spec.capability_id,
            inputs: spec.inputs,
            payload_snapshot: spec.payload_snapshot,
            created_at: spec.created_at,
        };

        tracing::info!(
            task_id = %task_id,
            node_id = %node_id,
            capability = %request.capability_id,
            "Placeholder created"
        );
        self.emit(EngineEvent::Submitted(TaskSubmittedEvent {
            task_id: task_id.clone(),
            node_id,
            capability_id: request.capability_id,
        }));

        self.tracked.insert(
            task_id,
            Tracked {
                placeholder: placeholder.clone(),
                state: PlaceholderState::Pending,
            },
        );
        placeholder
    }

    /// Patch a pending placeholder's progress. Ignored once settled.
    pub fn on_progress(&mut self, task_id: &TaskId, update: &ProgressUpdate) -> bool {
        let Some(tracked) = self.tracked.get(task_id) else {
            return false;
        };
        if tracked.state.is_settled() {
            return false;
        }
        let node_id = tracked.placeholder.node_id.clone();

        self.graph.update_node(
            &node_id,
            NodePatch::Progress {
                status: update.status.label().to_string(),
                progress: update.progress,
                message: update.message.clone(),
            },
        );
        self.emit(EngineEvent::Progress(TaskProgressEvent {
            task_id: task_id.clone(),
            node_id,
            status: update.status.label().to_string(),
            progress: update.progress,
            message: update.message.clone(),
        }));
        true
    }

    /// Settle a placeholder. Returns `false` if the task is unknown or was
    /// already settled, in which case nothing is touched.
    pub fn on_terminal(&mut self, task_id: &TaskId, outcome: &PollOutcome) -> bool {
        let Some(tracked) = self.tracked.get_mut(task_id) else {
            tracing::debug!(task_id = %task_id, "Terminal update for unknown task");
            return false;
        };
        if tracked.state.is_settled() {
            tracing::debug!(task_id = %task_id, state = ?tracked.state, "Already settled");
            return false;
        }
        let node_id = tracked.placeholder.node_id.clone();

        let event = match outcome {
            PollOutcome::Completed { task } => {
                tracked.state = PlaceholderState::Upgraded;
                self.graph.update_node(
                    &node_id,
                    NodePatch::Completed {
                        output_url: task.output_url.clone(),
                    },
                );
                tracing::info!(task_id = %task_id, node_id = %node_id, "Placeholder upgraded");
                EngineEvent::Completed(TaskCompletedEvent {
                    task_id: task_id.clone(),
                    node_id,
                    output_url: task.output_url.clone(),
                })
            }
            PollOutcome::Failed { message } | PollOutcome::TimedOut { message } => {
                tracked.state = PlaceholderState::Failed;
                self.graph.update_node(
                    &node_id,
                    NodePatch::Failed {
                        message: message.clone(),
                    },
                );
                tracing::info!(task_id = %task_id, node_id = %node_id, error = %message, "Placeholder failed");
                EngineEvent::Failed(TaskFailedEvent {
                    task_id: task_id.clone(),
                    node_id,
                    error: message.clone(),
                    timed_out: matches!(outcome, PollOutcome::TimedOut { .. }),
                })
            }
            PollOutcome::Cancelled => {
                tracked.state = PlaceholderState::Removed;
                self.graph.remove_node(&node_id);
                tracing::info!(task_id = %task_id, node_id = %node_id, "Placeholder removed");
                EngineEvent::Cancelled(TaskCancelledEvent {
                    task_id: task_id.clone(),
                    node_id,
                })
            }
        };

        self.emit(event);
        self.remember_settled(task_id.clone());
        true
    }

    fn remember_settled(&mut self, task_id: TaskId) {
        self.settled.push_back(task_id);
        while self.settled.len() > self.settled_capacity {
            if let Some(oldest) = self.settled.pop_front() {
                self.tracked.remove(&oldest);
            }
        }
    }

    pub fn placeholder(&self, task_id: &TaskId) -> Option<&PlaceholderNode> {
        self.tracked.get(task_id).map(|t| &t.placeholder)
    }

    pub fn state(&self, task_id: &TaskId) -> Option<PlaceholderState> {
        self.tracked.get(task_id).map(|t| t.state)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Work items for the reconciler owner task.
pub(crate) enum ReconcileCommand {
    Submitted {
        request: Box<GenerationRequest>,
        task_id: TaskId,
        reply: oneshot::Sender<PlaceholderNode>,
    },
    Progress {
        task_id: TaskId,
        update: ProgressUpdate,
    },
    Terminal {
        task_id: TaskId,
        outcome: PollOutcome,
    },
    State {
        task_id: TaskId,
        reply: oneshot::Sender<Option<PlaceholderState>>,
    },
}

/// Run the reconciler until every command sender is dropped.
pub(crate) fn spawn_reconciler(
    mut reconciler: Reconciler,
    mut commands: mpsc::Receiver<ReconcileCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                ReconcileCommand::Submitted {
                    request,
                    task_id,
                    reply,
                } => {
                    let placeholder = reconciler.on_submitted(&request, task_id);
                    let _ = reply.send(placeholder);
                }
                ReconcileCommand::Progress { task_id, update } => {
                    reconciler.on_progress(&task_id, &update);
                }
                ReconcileCommand::Terminal { task_id, outcome } => {
                    reconciler.on_terminal(&task_id, &outcome);
                }
                ReconcileCommand::State { task_id, reply } => {
                    let _ = reply.send(reconciler.state(&task_id));
                }
            }
        }
        tracing::debug!("Reconciler stopped");
    })
}

/// A node held by [`MemoryGraph`].
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub node_id: NodeId,
    pub task_id: TaskId,
    pub capability_id: CapabilityId,
    pub status: String,
    pub progress: u8,
    pub message: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

/// A recorded graph mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    Created(NodeId),
    Updated(NodeId, NodePatch),
    Removed(NodeId),
}

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<NodeId, GraphNode>,
    ops: Vec<GraphOp>,
    next_id: u64,
}

/// In-process graph model. Clones share the same nodes, so a host (or a
/// test) can keep a handle while the engine owns another.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<Mutex<GraphInner>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn node(&self, node_id: &NodeId) -> Option<GraphNode> {
        self.lock().nodes.get(node_id).cloned()
    }

    pub fn node_for_task(&self, task_id: &TaskId) -> Option<GraphNode> {
        self.lock()
            .nodes
            .values()
            .find(|n| &n.task_id == task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    /// Every mutation applied so far, in order.
    pub fn ops(&self) -> Vec<GraphOp> {
        self.lock().ops.clone()
    }
}

impl GraphModel for MemoryGraph {
    fn create_placeholder_node(&mut self, spec: &NodeSpec) -> NodeId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let node_id = NodeId(format!("node-{}", inner.next_id));
        inner.nodes.insert(
            node_id.clone(),
            GraphNode {
                node_id: node_id.clone(),
                task_id: spec.task_id.clone(),
                capability_id: spec.capability_id,
                status: "pending".to_string(),
                progress: 0,
                message: None,
                output_url: None,
                error: None,
            },
        );
        inner.ops.push(GraphOp::Created(node_id.clone()));
        node_id
    }

    fn update_node(&mut self, node_id: &NodeId, patch: NodePatch) {
        let mut inner = self.lock();
        if let Some(node) = inner.nodes.get_mut(node_id) {
            match &patch {
                NodePatch::Progress {
                    status,
                    progress,
                    message,
                } => {
                    node.status = status.clone();
                    node.progress = *progress;
                    node.message = message.clone();
                }
                NodePatch::Completed { output_url } => {
                    node.status = "completed".to_string();
                    node.progress = 100;
                    node.output_url = output_url.clone();
                }
                NodePatch::Failed { message } => {
                    node.status = "failed".to_string();
                    node.error = Some(message.clone());
                }
            }
        }
        inner.ops.push(GraphOp::Updated(node_id.clone(), patch));
    }

    fn remove_node(&mut self, node_id: &NodeId) {
        let mut inner = self.lock();
        inner.nodes.remove(node_id);
        inner.ops.push(GraphOp::Removed(node_id.clone()));
    }
}
