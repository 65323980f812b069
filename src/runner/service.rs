//! Front door for task submission and tracking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::config::RunnerConfig;
use crate::error::{Result, TaskError};
use crate::remote::executor::RemoteExecutor;
use crate::runner::events::{event_bus, EventBus, LifecycleEvent};
use crate::runner::handle::SubmittedTask;
use crate::runner::local::LocalExecutor;
use crate::runner::registry::{SubmittedTaskRegistry, TaskSummary};
use crate::task::envelope::{TaskEnvelope, TaskResult};
use crate::task::status::TaskStatus;
use crate::task::work::UnitOfWork;

/// Where a submission will execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote,
}

/// Decides whether an incoming submission collides with a task already
/// tracked by the registry.
pub trait ConflictPolicy: Send + Sync {
    fn conflicts(&self, incoming: &TaskEnvelope, existing: &dyn SubmittedTask) -> bool;
}

/// Default policy: a submission conflicts with any non-terminal task of the
/// same type from the same submitter. An Unknown observation blocks too —
/// when the real status cannot be determined, the task may still be running.
pub struct TypeAndSubmitterPolicy;

impl ConflictPolicy for TypeAndSubmitterPolicy {
    fn conflicts(&self, incoming: &TaskEnvelope, existing: &dyn SubmittedTask) -> bool {
        existing.envelope().task_type() == incoming.task_type()
            && existing.envelope().submitter() == incoming.submitter()
            && !existing.status().is_terminal()
    }
}

/// Accepts task submissions, places them locally or remotely, and tracks
/// every submitted task until its result is retrieved or the sweeper reclaims
/// it. Submission never blocks on execution.
pub struct TaskRunningService {
    registry: Arc<SubmittedTaskRegistry>,
    local: LocalExecutor,
    remote: Option<Arc<RemoteExecutor>>,
    conflicts: Box<dyn ConflictPolicy>,
    events: EventBus,
    config: RunnerConfig,
    /// Serializes the conflict scan with the registry insert; without it two
    /// concurrent conflicting submissions could both pass the scan.
    submit_gate: Mutex<()>,
}

impl TaskRunningService {
    /// Service with in-process execution only.
    pub fn new(config: RunnerConfig) -> Self {
        let events = event_bus(config.event_bus_capacity);
        Self {
            registry: Arc::new(SubmittedTaskRegistry::new()),
            local: LocalExecutor::new(config.worker_pool_size, events.clone()),
            remote: None,
            conflicts: Box::new(TypeAndSubmitterPolicy),
            events,
            config,
            submit_gate: Mutex::new(()),
        }
    }

    /// Service that prefers remote placement when a worker can service the
    /// task type, falling back to the local pool where the envelope allows.
    pub fn with_remote(config: RunnerConfig, remote: Arc<RemoteExecutor>) -> Self {
        let mut service = Self::new(config);
        service.remote = Some(remote);
        service
    }

    pub fn with_conflict_policy(mut self, policy: Box<dyn ConflictPolicy>) -> Self {
        self.conflicts = policy;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events published by tasks executing in this
    /// process.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub(crate) fn registry(&self) -> &Arc<SubmittedTaskRegistry> {
        &self.registry
    }

    /// Submit a task. Returns the generated task ID once the task is placed;
    /// execution proceeds independently.
    ///
    /// `work` is the unit of work used if the task runs in-process. When the
    /// task is placed remotely the worker re-resolves the type from its own
    /// registry.
    pub async fn submit(
        &self,
        mut envelope: TaskEnvelope,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<String> {
        let _gate = self.submit_gate.lock().await;

        for existing in self.registry.snapshot() {
            if self.conflicts.conflicts(&envelope, existing.as_ref()) {
                return Err(TaskError::Conflicting {
                    id: existing.task_id().to_string(),
                    submitted_at: existing
                        .envelope()
                        .submitted_at()
                        .unwrap_or_else(Utc::now),
                }
                .into());
            }
        }

        envelope.stamp_submitted();
        let envelope = Arc::new(envelope);
        let task_id = envelope.task_id().to_string();

        // Placement returns Remote only when a remote executor is configured.
        let handle: Arc<dyn SubmittedTask> = match (self.placement(&envelope)?, &self.remote) {
            (Placement::Remote, Some(remote)) => remote.submit(Arc::clone(&envelope)).await?,
            _ => {
                tracing::debug!(
                    task_id = %task_id,
                    task_type = %envelope.task_type(),
                    "placing task on local pool"
                );
                self.local.submit(Arc::clone(&envelope), work)
            }
        };

        self.registry.insert(handle);
        Ok(task_id)
    }

    /// Placement decision: remote when a reachable worker services the type,
    /// otherwise local unless the envelope forbids in-process execution.
    fn placement(&self, envelope: &TaskEnvelope) -> Result<Placement> {
        if let Some(remote) = &self.remote {
            if remote.is_reachable() && remote.can_service(envelope.task_type()) {
                return Ok(Placement::Remote);
            }
        }
        if !envelope.allow_in_process() {
            return Err(TaskError::NoWorkerAvailable {
                task_type: envelope.task_type().to_string(),
            }
            .into());
        }
        Ok(Placement::Local)
    }

    /// Current status of a task, `NotFound` if it is not tracked.
    pub fn status(&self, task_id: &str) -> Result<TaskStatus> {
        Ok(self.lookup(task_id)?.status())
    }

    /// Request cancellation. `Ok(false)` when the task is not tracked (it may
    /// already have been reclaimed).
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let Some(handle) = self.registry.get(task_id) else {
            return Ok(false);
        };
        Ok(handle.request_cancel().await)
    }

    /// Non-blocking result check. A retrieved result removes the task from
    /// the registry, so retrieval is at-most-once: a second call returns
    /// `None`, as does a check for a task that was never tracked.
    pub fn check_result(&self, task_id: &str) -> Option<TaskResult> {
        let handle = self.registry.get(task_id)?;
        let result = handle.check_result()?;
        self.registry.remove(task_id);
        Some(result)
    }

    /// Block until the task's result is available, then remove it from the
    /// registry. Failure and cancellation surface as errors and also release
    /// the registry entry.
    pub async fn await_result(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<TaskResult> {
        let handle = self.lookup(task_id)?;
        let outcome = handle.await_result(timeout).await;
        match &outcome {
            Ok(_) | Err(crate::Error::Task(TaskError::Failed { .. }))
            | Err(crate::Error::Task(TaskError::Cancelled { .. })) => {
                self.registry.remove(task_id);
            }
            Err(_) => {}
        }
        outcome
    }

    /// Arm notification-on-completion for an already submitted task.
    pub async fn add_email_alert(&self, task_id: &str) -> Result<()> {
        self.lookup(task_id)?.arm_email_alert().await
    }

    /// Drop a task from tracking without cancelling it.
    pub fn discard(&self, task_id: &str) -> bool {
        self.registry.remove(task_id).is_some()
    }

    /// Point-in-time view of every tracked task.
    pub fn list_submitted(&self) -> Vec<TaskView> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|handle| TaskView {
                task_id: handle.task_id().to_string(),
                submitter: handle.envelope().submitter().to_string(),
                task_type: handle.envelope().task_type().to_string(),
                status: handle.status(),
                submitted_at: handle.envelope().submitted_at(),
                started_at: handle.started_at(),
                finished_at: handle.finished_at(),
                remote: handle.is_remote(),
            })
            .collect()
    }

    pub fn summary(&self) -> TaskSummary {
        self.registry.summary()
    }

    fn lookup(&self, task_id: &str) -> Result<Arc<dyn SubmittedTask>> {
        self.registry.get(task_id).ok_or_else(|| {
            TaskError::NotFound {
                id: task_id.to_string(),
            }
            .into()
        })
    }
}

/// Read-only snapshot of one tracked task.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: String,
    pub submitter: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub remote: bool,
}
