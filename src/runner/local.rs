//! In-process execution on a bounded worker pool.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::runner::events::{EventBus, LifecycleEvent};
use crate::runner::executing::ExecutingTask;
use crate::runner::handle::{LocalTaskHandle, TaskState};
use crate::task::envelope::TaskEnvelope;
use crate::task::status::TaskStatus;
use crate::task::work::UnitOfWork;

/// Runs tasks on a bounded pool inside the current process.
///
/// Each submission spawns exactly one task which first waits for a pool
/// permit. Cancellation before the permit is acquired (or before the body
/// starts) guarantees the unit of work is never invoked; cancellation during
/// execution aborts the running task at its next await point.
pub struct LocalExecutor {
    permits: Arc<Semaphore>,
    events: EventBus,
}

impl LocalExecutor {
    pub fn new(pool_size: usize, events: EventBus) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            events,
        }
    }

    /// Enqueue a unit of work. Returns immediately with a cancellable handle;
    /// never blocks on execution.
    pub fn submit(
        &self,
        envelope: Arc<TaskEnvelope>,
        work: Arc<dyn UnitOfWork>,
    ) -> Arc<LocalTaskHandle> {
        let state = Arc::new(TaskState::new(envelope.email_on_completion()));
        let handle = Arc::new(LocalTaskHandle::new(
            Arc::clone(&envelope),
            Arc::clone(&state),
            self.events.clone(),
        ));

        let permits = Arc::clone(&self.permits);
        let events = self.events.clone();
        let join = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!(task_id = %envelope.task_id(), "worker pool closed before start");
                return;
            };

            // A cancel that arrived while queued must prevent the body from
            // ever running.
            if state.cancel_requested() {
                if state.transition(TaskStatus::Cancelled) {
                    state.wake_result_waiters();
                    let _ = events.send(LifecycleEvent::snapshot(&envelope, &state));
                }
                return;
            }

            let sink = state.progress_log();
            let exec = ExecutingTask::new(
                Arc::clone(&envelope),
                Arc::clone(&state),
                sink,
                events,
                false,
            );
            let result = exec.execute(work).await;
            state.store_result(result);
        });

        handle.attach(join);
        handle
    }
}
