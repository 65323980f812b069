//! Lifecycle wrapper around a single unit-of-work execution.

use std::sync::Arc;

use crate::runner::events::{EventBus, LifecycleEvent};
use crate::runner::handle::TaskState;
use crate::task::envelope::{TaskEnvelope, TaskResult};
use crate::task::progress::ProgressSink;
use crate::task::status::TaskStatus;
use crate::task::work::{UnitOfWork, WorkContext};

/// Runs one unit of work through a fixed lifecycle, identically for local and
/// remote execution: mark Running (stamping the start time and re-establishing
/// the propagated credentials in the work context), attach the progress sink,
/// call the body, then mark Done or Failed. The sink is detached with the
/// work context on every exit path.
///
/// Transitions are emitted on the lifecycle event bus; nothing here sends
/// notifications directly.
pub struct ExecutingTask {
    envelope: Arc<TaskEnvelope>,
    state: Arc<TaskState>,
    sink: Arc<dyn ProgressSink>,
    events: EventBus,
    remote: bool,
}

impl ExecutingTask {
    pub fn new(
        envelope: Arc<TaskEnvelope>,
        state: Arc<TaskState>,
        sink: Arc<dyn ProgressSink>,
        events: EventBus,
        remote: bool,
    ) -> Self {
        Self {
            envelope,
            state,
            sink,
            events,
            remote,
        }
    }

    /// Execute the unit of work and produce its result. The result is built
    /// exactly once; storing it on a handle is the caller's job.
    pub async fn execute(&self, work: Arc<dyn UnitOfWork>) -> TaskResult {
        self.before_run();

        let ctx = WorkContext::new(
            self.envelope.task_id(),
            self.envelope.credentials().clone(),
            Arc::clone(&self.sink),
        );
        let outcome = work.execute(&ctx).await;
        drop(ctx);

        match outcome {
            Ok(answer) => {
                let result =
                    TaskResult::success(self.envelope.task_id(), answer, self.remote);
                self.after_run();
                result
            }
            Err(cause) => {
                let result = TaskResult::failure(
                    self.envelope.task_id(),
                    cause.to_string(),
                    self.remote,
                );
                self.on_failure(&cause);
                result
            }
        }
    }

    fn before_run(&self) {
        if self.state.transition(TaskStatus::Running) {
            tracing::debug!(
                task_id = %self.envelope.task_id(),
                task_type = %self.envelope.task_type(),
                remote = self.remote,
                "task started"
            );
            self.emit();
        }
    }

    fn after_run(&self) {
        if self.state.transition(TaskStatus::Done) {
            tracing::info!(task_id = %self.envelope.task_id(), "task completed");
            self.emit();
        }
    }

    fn on_failure(&self, cause: &crate::Error) {
        tracing::warn!(
            task_id = %self.envelope.task_id(),
            error = %cause,
            "task failed"
        );
        if self.state.transition(TaskStatus::Failed) {
            self.emit();
        }
    }

    fn emit(&self) {
        let _ = self
            .events
            .send(LifecycleEvent::snapshot(&self.envelope, &self.state));
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::runner::events::event_bus;

    struct Greeter;

    #[async_trait]
    impl UnitOfWork for Greeter {
        fn task_type(&self) -> &str {
            "greeter"
        }

        async fn execute(&self, ctx: &WorkContext) -> Result<serde_json::Value> {
            ctx.progress("saying hello").await;
            Ok(serde_json::json!("hello"))
        }
    }

    struct Exploder;

    #[async_trait]
    impl UnitOfWork for Exploder {
        fn task_type(&self) -> &str {
            "exploder"
        }

        async fn execute(&self, _ctx: &WorkContext) -> Result<serde_json::Value> {
            Err(crate::Error::work("kaboom"))
        }
    }

    fn fixture() -> (Arc<TaskEnvelope>, Arc<TaskState>, EventBus) {
        let envelope = Arc::new(TaskEnvelope::new("alice", "greeter"));
        let state = Arc::new(TaskState::new(false));
        (envelope, state, event_bus(16))
    }

    #[tokio::test]
    async fn success_path_transitions_and_emits() {
        let (envelope, state, events) = fixture();
        let mut rx = events.subscribe();
        let sink = state.progress_log();

        let exec = ExecutingTask::new(
            Arc::clone(&envelope),
            Arc::clone(&state),
            sink,
            events,
            false,
        );
        let result = exec.execute(Arc::new(Greeter)).await;

        assert!(!result.is_failure());
        assert_eq!(result.answer, serde_json::json!("hello"));
        assert_eq!(state.status(), TaskStatus::Done);
        assert!(state.started_at().is_some());
        assert_eq!(state.progress_lines(), vec!["saying hello"]);

        assert_eq!(rx.recv().await.unwrap().status, TaskStatus::Running);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.progress, vec!["saying hello"]);
    }

    #[tokio::test]
    async fn failure_path_records_cause() {
        let (envelope, state, events) = fixture();
        let sink = state.progress_log();

        let exec = ExecutingTask::new(
            Arc::clone(&envelope),
            Arc::clone(&state),
            sink,
            events,
            true,
        );
        let result = exec.execute(Arc::new(Exploder)).await;

        assert!(result.is_failure());
        assert!(result.ran_remotely);
        assert!(result.failure.as_deref().unwrap().contains("kaboom"));
        assert_eq!(state.status(), TaskStatus::Failed);
        assert!(state.finished_at().is_some());
    }
}
