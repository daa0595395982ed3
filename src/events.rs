use serde::{Deserialize, Serialize};

use crate::capability::CapabilityId;
use crate::types::{NodeId, TaskId};

/// Emitted once a task is accepted and its placeholder exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmittedEvent {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub capability_id: CapabilityId,
}

/// Emitted on every applied progress change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressEvent {
    pub task_id: TaskId,
    pub node_id: NodeId,
    /// Status label, including capability sub-statuses.
    pub status: String,
    pub progress: u8,
    pub message: Option<String>,
}

/// Emitted when the placeholder is upgraded with the generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletedEvent {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub output_url: Option<String>,
}

/// Emitted when a task fails or runs out of poll budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailedEvent {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub error: String,
    pub timed_out: bool,
}

/// Emitted when a task is cancelled and its placeholder removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCancelledEvent {
    pub task_id: TaskId,
    pub node_id: NodeId,
}

/// Everything the engine broadcasts to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Submitted(TaskSubmittedEvent),
    Progress(TaskProgressEvent),
    Completed(TaskCompletedEvent),
    Failed(TaskFailedEvent),
    Cancelled(TaskCancelledEvent),
}

impl EngineEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            EngineEvent::Submitted(e) => &e.task_id,
            EngineEvent::Progress(e) => &e.task_id,
            EngineEvent::Completed(e) => &e.task_id,
            EngineEvent::Failed(e) => &e.task_id,
            EngineEvent::Cancelled(e) => &e.task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::Completed(_) | EngineEvent::Failed(_) | EngineEvent::Cancelled(_)
        )
    }
}
