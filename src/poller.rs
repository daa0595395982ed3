//! Status polling.
//!
//! [`PollMachine`] is the pure per-task state machine: it consumes one fetch
//! result per tick and says what, if anything, changed. [`TaskPoller`] owns
//! the timers. Each task gets one spawned loop with its own cancellation
//! token, and every loop ends in exactly one terminal outcome unless it was
//! superseded by a newer poll for the same task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityId;
use crate::client::TaskService;
use crate::error::FetchError;
use crate::reconcile::ReconcileCommand;
use crate::types::{GenerationTask, TaskId, TaskStatus};

/// A non-terminal observation worth showing on the placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { task: GenerationTask },
    Failed { message: String },
    Cancelled,
    TimedOut { message: String },
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Completed { .. } => "completed",
            PollOutcome::Failed { .. } => "failed",
            PollOutcome::Cancelled => "cancelled",
            PollOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

/// Coarse poll lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

/// What a single tick produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TickEffect {
    /// Nothing visible changed (or the fetch failed and the tick was skipped).
    Unchanged,
    Progress(ProgressUpdate),
    Terminal(PollOutcome),
}

/// Pure polling state machine for one task.
#[derive(Debug, Clone)]
pub struct PollMachine {
    max_attempts: u32,
    attempts: u32,
    last: Option<ProgressUpdate>,
    outcome: Option<PollOutcome>,
}

impl PollMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            last: None,
            outcome: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> Option<&PollOutcome> {
        self.outcome.as_ref()
    }

    pub fn phase(&self) -> PollPhase {
        match &self.outcome {
            None if self.attempts == 0 => PollPhase::Idle,
            None => PollPhase::Polling,
            Some(PollOutcome::Completed { .. }) => PollPhase::Completed,
            Some(PollOutcome::Failed { .. }) => PollPhase::Failed,
            Some(PollOutcome::Cancelled) => PollPhase::Cancelled,
            Some(PollOutcome::TimedOut { .. }) => PollPhase::TimedOut,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Apply one fetch result. Once finished, every further tick is ignored.
    pub fn on_tick(&mut self, result: Result<GenerationTask, FetchError>) -> TickEffect {
        if self.is_finished() {
            return TickEffect::Unchanged;
        }
        self.attempts += 1;

        let effect = match result {
            Err(_) => TickEffect::Unchanged,
            Ok(task) => self.observe(task),
        };

        if let TickEffect::Terminal(outcome) = &effect {
            self.outcome = Some(outcome.clone());
            return effect;
        }

        if self.attempts >= self.max_attempts {
            let outcome = PollOutcome::TimedOut {
                message: format!(
                    "Generation timed out after {} status checks",
                    self.max_attempts
                ),
            };
            self.outcome = Some(outcome.clone());
            return TickEffect::Terminal(outcome);
        }

        effect
    }

    /// Stop polling. Returns `Cancelled` unless a terminal state was
    /// already reached.
    pub fn cancel(&mut self) -> Option<PollOutcome> {
        if self.is_finished() {
            return None;
        }
        self.outcome = Some(PollOutcome::Cancelled);
        Some(PollOutcome::Cancelled)
    }

    fn observe(&mut self, task: GenerationTask) -> TickEffect {
        match task.status {
            TaskStatus::Completed if task.output_url.is_none() => {
                tracing::warn!(task_id = %task.id, "Task completed without an output URL");
                TickEffect::Terminal(PollOutcome::Failed {
                    message: "Generation completed without an output".to_string(),
                })
            }
            TaskStatus::Completed => TickEffect::Terminal(PollOutcome::Completed { task }),
            TaskStatus::Failed => TickEffect::Terminal(PollOutcome::Failed {
                message: task
                    .error_message
                    .or(task.status_message)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Generation failed".to_string()),
            }),
            TaskStatus::Cancelled => TickEffect::Terminal(PollOutcome::Cancelled),
            status => {
                // Progress never moves backwards within one status label.
                let progress = match &self.last {
                    Some(last) if last.status == status => last.progress.max(task.progress),
                    _ => task.progress,
                };
                let update = ProgressUpdate {
                    status,
                    progress,
                    message: task.status_message,
                };
                if self.last.as_ref() == Some(&update) {
                    return TickEffect::Unchanged;
                }
                self.last = Some(update.clone());
                TickEffect::Progress(update)
            }
        }
    }
}

struct ActivePoll {
    token: CancellationToken,
    superseded: Arc<AtomicBool>,
    generation: u64,
}

/// Spawns and tracks one polling loop per task id.
#[derive(Clone)]
pub struct TaskPoller {
    service: Arc<dyn TaskService>,
    interval: Duration,
    max_attempts: u32,
    commands: mpsc::Sender<ReconcileCommand>,
    active: Arc<Mutex<HashMap<TaskId, ActivePoll>>>,
    generations: Arc<AtomicU64>,
}

impl TaskPoller {
    pub(crate) fn new(
        service: Arc<dyn TaskService>,
        interval: Duration,
        max_attempts: u32,
        commands: mpsc::Sender<ReconcileCommand>,
    ) -> Self {
        Self {
            service,
            interval,
            max_attempts,
            commands,
            active: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<TaskId, ActivePoll>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start polling `task_id` under `parent`. A poll already running for
    /// the same id is superseded: it stops without reporting anything.
    ///
    /// The handle resolves to the outcome that was reconciled, or `None`
    /// if this loop was itself superseded.
    pub fn start(
        &self,
        task_id: TaskId,
        capability: CapabilityId,
        parent: &CancellationToken,
    ) -> JoinHandle<Option<PollOutcome>> {
        let token = parent.child_token();
        let superseded = Arc::new(AtomicBool::new(false));
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);

        {
            let mut active = self.lock_active();
            if let Some(prior) = active.insert(
                task_id.clone(),
                ActivePoll {
                    token: token.clone(),
                    superseded: Arc::clone(&superseded),
                    generation,
                },
            ) {
                tracing::debug!(task_id = %task_id, "Superseding existing poll");
                prior.superseded.store(true, Ordering::SeqCst);
                prior.token.cancel();
            }
        }

        tracing::info!(
            task_id = %task_id,
            capability = %capability,
            interval_ms = self.interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "Polling started"
        );

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.run(&task_id, capability, token, superseded).await;

            let mut active = this.lock_active();
            if active.get(&task_id).map(|p| p.generation) == Some(generation) {
                active.remove(&task_id);
            }
            outcome
        })
    }

    /// Cancel the poll for `task_id`. It reconciles as `Cancelled`.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.lock_active().get(task_id) {
            Some(poll) => {
                poll.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, task_id: &TaskId) -> bool {
        self.lock_active().contains_key(task_id)
    }

    /// Task ids with a running poll loop.
    pub fn active(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn run(
        &self,
        task_id: &TaskId,
        capability: CapabilityId,
        token: CancellationToken,
        superseded: Arc<AtomicBool>,
    ) -> Option<PollOutcome> {
        let mut machine = PollMachine::new(self.max_attempts);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break machine.cancel(),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break machine.cancel(),
                result = self.service.fetch_status(task_id) => result,
            };
            if token.is_cancelled() {
                break machine.cancel();
            }

            if let Err(e) = &result {
                tracing::warn!(
                    task_id = %task_id,
                    attempt = machine.attempts() + 1,
                    error = %e,
                    "Status fetch failed, skipping tick"
                );
            }

            match machine.on_tick(result) {
                TickEffect::Unchanged => {
                    tracing::debug!(task_id = %task_id, attempt = machine.attempts(), "Poll tick");
                }
                TickEffect::Progress(update) => {
                    tracing::debug!(
                        task_id = %task_id,
                        attempt = machine.attempts(),
                        status = update.status.label(),
                        progress = update.progress,
                        "Poll progress"
                    );
                    self.send(ReconcileCommand::Progress {
                        task_id: task_id.clone(),
                        update,
                    })
                    .await;
                }
                TickEffect::Terminal(outcome) => break Some(outcome),
            }
        };

        if superseded.load(Ordering::SeqCst) {
            tracing::debug!(task_id = %task_id, "Superseded poll stopped");
            return None;
        }

        let outcome = outcome?;
        tracing::info!(
            task_id = %task_id,
            capability = %capability,
            attempts = machine.attempts(),
            outcome = outcome.label(),
            "Polling finished"
        );
        self.send(ReconcileCommand::Terminal {
            task_id: task_id.clone(),
            outcome: outcome.clone(),
        })
        .await;
        Some(outcome)
    }

    async fn send(&self, command: ReconcileCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("Reconciler has stopped, dropping update");
        }
    }
}
