//! Submitted-task handles — the live, queryable tracking objects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{Result, TaskError};
use crate::runner::events::{EventBus, LifecycleEvent};
use crate::task::envelope::{TaskEnvelope, TaskResult};
use crate::task::progress::BufferedProgressSink;
use crate::task::status::TaskStatus;

/// Shared mutable tracking state of one submitted task.
///
/// Read concurrently by the submitting client, the executing task and the
/// sweeper; each field has a single writer at a time. The status write lock
/// serializes transitions, so exactly one caller wins any contested
/// transition.
pub struct TaskState {
    status: RwLock<TaskStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    finished_at: RwLock<Option<DateTime<Utc>>>,
    email_alert: AtomicBool,
    cancel_requested: AtomicBool,
    progress: Arc<BufferedProgressSink>,
    result: Mutex<Option<TaskResult>>,
    result_ready: Notify,
}

impl TaskState {
    pub fn new(email_alert: bool) -> Self {
        Self {
            status: RwLock::new(TaskStatus::Queued),
            started_at: RwLock::new(None),
            finished_at: RwLock::new(None),
            email_alert: AtomicBool::new(email_alert),
            cancel_requested: AtomicBool::new(false),
            progress: Arc::new(BufferedProgressSink::new()),
            result: Mutex::new(None),
            result_ready: Notify::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.read().unwrap()
    }

    /// Apply a transition with the current time. Returns `false` if the state
    /// machine forbids it (duplicate or stale transitions are no-ops).
    pub fn transition(&self, to: TaskStatus) -> bool {
        self.transition_at(to, Utc::now())
    }

    /// Apply a transition stamped with a caller-supplied time (used when
    /// replaying transitions observed over the transport).
    pub fn transition_at(&self, to: TaskStatus, at: DateTime<Utc>) -> bool {
        let mut status = self.status.write().unwrap();
        if !status.can_transition_to(to) {
            return false;
        }
        *status = to;
        drop(status);

        match to {
            TaskStatus::Running => {
                let mut started = self.started_at.write().unwrap();
                if started.is_none() {
                    *started = Some(at);
                }
            }
            s if s.is_terminal() => {
                let mut finished = self.finished_at.write().unwrap();
                if finished.is_none() {
                    *finished = Some(at);
                }
            }
            _ => {}
        }
        true
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read().unwrap()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.read().unwrap()
    }

    pub fn arm_email_alert(&self) {
        self.email_alert.store(true, Ordering::SeqCst);
    }

    pub fn alert_armed(&self) -> bool {
        self.email_alert.load(Ordering::SeqCst)
    }

    pub fn mark_cancel_requested(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// The accumulated progress log; also serves as the attached sink during
    /// local execution.
    pub fn progress_log(&self) -> Arc<BufferedProgressSink> {
        Arc::clone(&self.progress)
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.progress.lines()
    }

    /// Store the terminal result and wake blocked waiters. The result is
    /// produced exactly once per task; a second store is ignored.
    pub fn store_result(&self, result: TaskResult) {
        let mut slot = self.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(result);
        }
        drop(slot);
        self.result_ready.notify_waiters();
    }

    /// Take the result, if available. At-most-once: a second call returns
    /// `None`.
    pub fn take_result(&self) -> Option<TaskResult> {
        self.result.lock().unwrap().take()
    }

    pub fn has_result(&self) -> bool {
        self.result.lock().unwrap().is_some()
    }

    /// Wake blocked result waiters without storing a result (cancellation).
    pub fn wake_result_waiters(&self) {
        self.result_ready.notify_waiters();
    }

    /// Block until the result arrives or the task is cancelled.
    pub async fn await_result(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<TaskResult> {
        let wait = async {
            loop {
                let notified = self.result_ready.notified();
                if let Some(result) = self.take_result() {
                    if let Some(reason) = result.failure.clone() {
                        return Err(TaskError::Failed {
                            id: task_id.to_string(),
                            reason,
                        }
                        .into());
                    }
                    return Ok(result);
                }
                if self.status() == TaskStatus::Cancelled {
                    return Err(TaskError::Cancelled {
                        id: task_id.to_string(),
                    }
                    .into());
                }
                notified.await;
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TaskError::ResultTimeout {
                    id: task_id.to_string(),
                    waited: limit,
                }
                .into()),
            },
        }
    }
}

/// Uniform interface over local handles and remote proxies.
#[async_trait]
pub trait SubmittedTask: Send + Sync {
    fn envelope(&self) -> &Arc<TaskEnvelope>;

    fn task_id(&self) -> &str {
        self.envelope().task_id()
    }

    fn is_remote(&self) -> bool;

    /// Current status. For a proxy this lazily drains pending lifecycle
    /// messages first; if the transport cannot be reached the observation
    /// degrades to [`TaskStatus::Unknown`].
    fn status(&self) -> TaskStatus;

    fn started_at(&self) -> Option<DateTime<Utc>>;

    fn finished_at(&self) -> Option<DateTime<Utc>>;

    fn progress_lines(&self) -> Vec<String>;

    fn alert_armed(&self) -> bool;

    /// Idempotently arm notification-on-completion.
    async fn arm_email_alert(&self) -> Result<()>;

    /// Request cancellation. Returns whether the request was *accepted*, not
    /// whether cancellation took effect — remote cancellation is best-effort.
    async fn request_cancel(&self) -> bool;

    /// Non-blocking result check. At-most-once: once a result has been
    /// retrieved, later calls return `None`.
    fn check_result(&self) -> Option<TaskResult>;

    /// Block until the result is available, the task is cancelled, or the
    /// timeout elapses. A failed task surfaces as [`TaskError::Failed`] with
    /// the original cause.
    async fn await_result(&self, timeout: Option<Duration>) -> Result<TaskResult>;
}

/// Handle for a task running on the in-process pool.
pub struct LocalTaskHandle {
    envelope: Arc<TaskEnvelope>,
    state: Arc<TaskState>,
    join: Mutex<Option<JoinHandle<()>>>,
    events: EventBus,
}

impl LocalTaskHandle {
    pub(crate) fn new(envelope: Arc<TaskEnvelope>, state: Arc<TaskState>, events: EventBus) -> Self {
        Self {
            envelope,
            state,
            join: Mutex::new(None),
            events,
        }
    }

    pub(crate) fn attach(&self, join: JoinHandle<()>) {
        *self.join.lock().unwrap() = Some(join);
    }
}

#[async_trait]
impl SubmittedTask for LocalTaskHandle {
    fn envelope(&self) -> &Arc<TaskEnvelope> {
        &self.envelope
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn status(&self) -> TaskStatus {
        self.state.status()
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.started_at()
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.finished_at()
    }

    fn progress_lines(&self) -> Vec<String> {
        self.state.progress_lines()
    }

    fn alert_armed(&self) -> bool {
        self.state.alert_armed()
    }

    async fn arm_email_alert(&self) -> Result<()> {
        self.state.arm_email_alert();
        Ok(())
    }

    async fn request_cancel(&self) -> bool {
        self.state.mark_cancel_requested();

        if let Some(join) = self.join.lock().unwrap().as_ref() {
            join.abort();
        }

        // The aborted task cannot report its own terminal state, so the
        // cancelling side performs the bookkeeping. If the task already
        // reached a terminal state the transition is a no-op.
        if self.state.transition(TaskStatus::Cancelled) {
            tracing::info!(task_id = %self.envelope.task_id(), "local task cancelled");
            self.state.wake_result_waiters();
            let _ = self
                .events
                .send(LifecycleEvent::snapshot(&self.envelope, &self.state));
        }
        true
    }

    fn check_result(&self) -> Option<TaskResult> {
        self.state.take_result()
    }

    async fn await_result(&self, timeout: Option<Duration>) -> Result<TaskResult> {
        self.state
            .await_result(self.envelope.task_id(), timeout)
            .await
    }
}
