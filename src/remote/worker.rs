//! Worker side of remote execution.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::remote::channels;
use crate::remote::messages::{
    self, ControlMessage, ControlRequest, LifecycleMessage, ProgressMessage, SubmissionMessage,
    WorkerAnnouncement,
};
use crate::remote::transport::Transport;
use crate::runner::events::{EventBus, LifecycleEvent};
use crate::runner::executing::ExecutingTask;
use crate::runner::handle::TaskState;
use crate::task::envelope::{TaskEnvelope, TaskResult};
use crate::task::progress::{BufferedProgressSink, ProgressSink};
use crate::task::status::TaskStatus;
use crate::task::work::WorkRegistry;

/// Pause after a transport error before retrying a consume loop.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Progress sink that forwards every line to the per-task progress channel
/// and mirrors it into the worker-side buffer.
struct ForwardingProgressSink {
    transport: Arc<dyn Transport>,
    channel: String,
    task_id: String,
    mirror: Arc<BufferedProgressSink>,
}

#[async_trait]
impl ProgressSink for ForwardingProgressSink {
    async fn append(&self, line: &str) {
        self.mirror.push(line);
        let msg = ProgressMessage {
            task_id: self.task_id.clone(),
            line: line.to_string(),
        };
        let Ok(bytes) = messages::encode(&self.channel, &msg) else {
            return;
        };
        // Progress is advisory; a dropped line is logged, not raised.
        if let Err(e) = self.transport.publish(&self.channel, bytes).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "progress line not forwarded");
        }
    }
}

struct ActiveTask {
    envelope: Arc<TaskEnvelope>,
    state: Arc<TaskState>,
    // Filled in once the execution task is spawned; the entry itself is
    // registered first so control messages never observe a running task
    // without an entry.
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Consumes the shared submission channel, executes resolved units of work
/// and publishes lifecycle transitions, progress and the terminal result to
/// the per-task channels. Also honors cancel / add-alert control messages.
pub struct TaskWorker {
    worker_id: String,
    transport: Arc<dyn Transport>,
    work_types: Arc<WorkRegistry>,
    events: EventBus,
    active: DashMap<String, ActiveTask>,
    /// Task IDs cancelled before their submission was picked up. Checked (and
    /// consumed) in `accept`, so a cancel that outruns its submission still
    /// prevents the body from running.
    cancelled: DashSet<String>,
}

impl TaskWorker {
    pub fn new(
        worker_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        work_types: Arc<WorkRegistry>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker_id: worker_id.into(),
            transport,
            work_types,
            events,
            active: DashMap::new(),
            cancelled: DashSet::new(),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Lifecycle event bus of this worker process, for attaching a
    /// notification dispatcher or monitoring.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Publish this worker's capability announcement.
    pub async fn announce(&self) -> Result<()> {
        let announcement = WorkerAnnouncement {
            worker_id: self.worker_id.clone(),
            task_types: self.work_types.serviceable_types(),
        };
        self.transport
            .publish(
                channels::WORKERS,
                messages::encode(channels::WORKERS, &announcement)?,
            )
            .await?;
        tracing::info!(
            worker_id = %self.worker_id,
            types = ?announcement.task_types,
            "worker announced"
        );
        Ok(())
    }

    /// Announce and start the submission and control consumer loops.
    pub async fn start(self: &Arc<Self>) -> Result<WorkerHandle> {
        self.announce().await?;

        let submissions = {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.submission_loop().await })
        };
        let control = {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.control_loop().await })
        };
        Ok(WorkerHandle {
            submissions,
            control,
        })
    }

    async fn submission_loop(self: Arc<Self>) {
        loop {
            match self.transport.receive(channels::SUBMISSION, None).await {
                Ok(Some(bytes)) => {
                    match messages::decode::<SubmissionMessage>(channels::SUBMISSION, &bytes) {
                        Ok(msg) => self.accept(msg.envelope).await,
                        Err(e) => tracing::warn!(error = %e, "bad submission message"),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "submission channel unavailable");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn control_loop(self: Arc<Self>) {
        loop {
            match self.transport.receive(channels::CONTROL, None).await {
                Ok(Some(bytes)) => {
                    match messages::decode::<ControlMessage>(channels::CONTROL, &bytes) {
                        Ok(msg) => self.handle_control(msg).await,
                        Err(e) => tracing::warn!(error = %e, "bad control message"),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "control channel unavailable");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// Resolve and launch one submitted task.
    async fn accept(self: &Arc<Self>, envelope: TaskEnvelope) {
        let envelope = Arc::new(envelope);
        let task_id = envelope.task_id().to_string();

        if self.cancelled.remove(&task_id).is_some() {
            tracing::info!(task_id = %task_id, "submission cancelled before pickup");
            self.publish_lifecycle(&task_id, TaskStatus::Cancelled).await;
            return;
        }

        let work = match self.work_types.resolve(&envelope) {
            Ok(work) => work,
            Err(e) => {
                // Type resolution happens after the synchronous submit call
                // returned on the client, so the failure travels back as a
                // failed result, never as a submit-time error.
                tracing::warn!(
                    task_id = %task_id,
                    task_type = %envelope.task_type(),
                    "no unit of work for submitted type"
                );
                let result = TaskResult::failure(&task_id, e.to_string(), true);
                self.publish_result(&task_id, &result).await;
                return;
            }
        };

        let state = Arc::new(TaskState::new(envelope.email_on_completion()));

        // The entry must be visible before the execution task can finish,
        // otherwise a fast body could remove it before it ever existed and
        // leave a stale entry behind.
        self.active.insert(
            task_id.clone(),
            ActiveTask {
                envelope: Arc::clone(&envelope),
                state: Arc::clone(&state),
                join: Mutex::new(None),
            },
        );

        let worker = Arc::clone(self);
        let join = tokio::spawn(async move {
            let id = envelope.task_id().to_string();
            let sink: Arc<dyn ProgressSink> = Arc::new(ForwardingProgressSink {
                transport: Arc::clone(&worker.transport),
                channel: channels::progress(&id),
                task_id: id.clone(),
                mirror: state.progress_log(),
            });

            worker.publish_lifecycle(&id, TaskStatus::Running).await;

            let exec = ExecutingTask::new(
                Arc::clone(&envelope),
                Arc::clone(&state),
                sink,
                worker.events.clone(),
                true,
            );
            let result = exec.execute(work).await;

            worker.publish_lifecycle(&id, state.status()).await;
            worker.publish_result(&id, &result).await;
            worker.active.remove(&id);
        });

        // The body may already have finished and removed the entry.
        if let Some(task) = self.active.get(&task_id) {
            *task.join.lock().unwrap() = Some(join);
        }
    }

    async fn handle_control(&self, msg: ControlMessage) {
        match msg.request {
            ControlRequest::Cancel => {
                let Some((_, task)) = self.active.remove(&msg.task_id) else {
                    tracing::debug!(
                        task_id = %msg.task_id,
                        "cancel for a task not yet picked up; remembering"
                    );
                    self.cancelled.insert(msg.task_id.clone());
                    return;
                };
                if let Some(join) = task.join.lock().unwrap().take() {
                    join.abort();
                }
                if task.state.transition(TaskStatus::Cancelled) {
                    tracing::info!(task_id = %msg.task_id, "remote task cancelled");
                    let _ = self
                        .events
                        .send(LifecycleEvent::snapshot(&task.envelope, &task.state));
                    self.publish_lifecycle(&msg.task_id, TaskStatus::Cancelled)
                        .await;
                }
            }
            ControlRequest::AddEmailAlert => {
                if let Some(task) = self.active.get(&msg.task_id) {
                    task.state.arm_email_alert();
                } else {
                    tracing::debug!(task_id = %msg.task_id, "alert request for unknown task");
                }
            }
        }
    }

    async fn publish_lifecycle(&self, task_id: &str, status: TaskStatus) {
        let channel = channels::lifecycle(task_id);
        let msg = LifecycleMessage {
            task_id: task_id.to_string(),
            status,
            at: Utc::now(),
        };
        let Ok(bytes) = messages::encode(&channel, &msg) else {
            return;
        };
        if let Err(e) = self.transport.publish(&channel, bytes).await {
            tracing::warn!(task_id = %task_id, error = %e, "lifecycle transition not published");
        }
    }

    async fn publish_result(&self, task_id: &str, result: &TaskResult) {
        let channel = channels::result(task_id);
        let Ok(bytes) = messages::encode(&channel, result) else {
            return;
        };
        if let Err(e) = self.transport.publish(&channel, bytes).await {
            tracing::warn!(task_id = %task_id, error = %e, "result not published");
        }
    }
}

/// Join handles for a started worker's consumer loops.
pub struct WorkerHandle {
    submissions: JoinHandle<()>,
    control: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop consuming. Tasks already running are not interrupted.
    pub fn shutdown(self) {
        self.submissions.abort();
        self.control.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::remote::executor::RemoteExecutor;
    use crate::remote::transport::InMemoryBroker;
    use crate::runner::events::event_bus;
    use crate::runner::handle::SubmittedTask;
    use crate::task::work::{UnitOfWork, WorkContext};

    struct Summing;

    #[async_trait]
    impl UnitOfWork for Summing {
        fn task_type(&self) -> &str {
            "summing"
        }

        async fn execute(&self, ctx: &WorkContext) -> Result<serde_json::Value> {
            ctx.progress("summing inputs").await;
            ctx.progress("done summing").await;
            Ok(serde_json::json!(6))
        }
    }

    struct Parked;

    #[async_trait]
    impl UnitOfWork for Parked {
        fn task_type(&self) -> &str {
            "parked"
        }

        async fn execute(&self, _ctx: &WorkContext) -> Result<serde_json::Value> {
            futures::future::pending::<()>().await;
            Ok(serde_json::Value::Null)
        }
    }

    fn registry_with(types: &[&str]) -> Arc<WorkRegistry> {
        let registry = Arc::new(WorkRegistry::new());
        for t in types {
            match *t {
                "summing" => registry.register("summing", |_| Arc::new(Summing) as _),
                "parked" => registry.register("parked", |_| Arc::new(Parked) as _),
                other => panic!("unknown test type {other}"),
            }
        }
        registry
    }

    #[tokio::test]
    async fn executes_submission_end_to_end() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&["summing"]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        assert!(executor.can_service("summing"));

        let envelope = Arc::new(TaskEnvelope::new("alice", "summing"));
        let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();

        let result = proxy
            .await_result(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(result.answer, serde_json::json!(6));
        assert!(result.ran_remotely);
        assert_eq!(proxy.status(), TaskStatus::Done);
        assert_eq!(
            proxy.progress_lines(),
            vec!["summing inputs", "done summing"]
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn unknown_type_fails_via_result_channel() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&[]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        let envelope = Arc::new(TaskEnvelope::new("alice", "mystery"));
        // The submit call itself succeeds; resolution happens on the worker.
        let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();

        let err = proxy
            .await_result(Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        match err {
            crate::Error::Task(TaskError::Failed { reason, .. }) => {
                assert!(reason.contains("mystery"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn fast_tasks_leave_no_stale_entries() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&["summing"]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        for _ in 0..5 {
            let envelope = Arc::new(TaskEnvelope::new("alice", "summing"));
            let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();
            proxy
                .await_result(Some(Duration::from_secs(2)))
                .await
                .unwrap();
        }

        // Each body removes its entry after publishing the result.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !worker.active.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown();
    }

    #[tokio::test]
    async fn alert_control_arms_the_running_task() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&["parked"]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        let envelope = Arc::new(TaskEnvelope::new("alice", "parked"));
        let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while proxy.status() != TaskStatus::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        proxy.arm_email_alert().await.unwrap();

        let id = envelope.task_id().to_string();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(task) = worker.active.get(&id) {
                    if task.state.alert_armed() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        proxy.request_cancel().await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn cancel_arriving_before_pickup_prevents_execution() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&["parked"]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let envelope = Arc::new(TaskEnvelope::new("alice", "parked"));
        let cancel = ControlMessage {
            task_id: envelope.task_id().to_string(),
            request: ControlRequest::Cancel,
        };
        broker
            .publish(
                channels::CONTROL,
                messages::encode(channels::CONTROL, &cancel).unwrap(),
            )
            .await
            .unwrap();
        // Let the control loop consume the cancel before the submission lands.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while proxy.status() != TaskStatus::Cancelled {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown();
    }

    #[tokio::test]
    async fn control_cancel_aborts_running_task() {
        let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());
        let worker = TaskWorker::new("w1", Arc::clone(&broker), registry_with(&["parked"]), event_bus(16));
        let handle = worker.start().await.unwrap();

        let executor = RemoteExecutor::new(Arc::clone(&broker));
        let envelope = Arc::new(TaskEnvelope::new("alice", "parked"));
        let proxy = executor.submit(Arc::clone(&envelope)).await.unwrap();

        // Wait for the worker to pick it up.
        tokio::time::timeout(Duration::from_secs(2), async {
            while proxy.status() != TaskStatus::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(proxy.request_cancel().await);

        let err = proxy
            .await_result(Some(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Task(TaskError::Cancelled { .. })
        ));
        assert_eq!(proxy.status(), TaskStatus::Cancelled);

        handle.shutdown();
    }
}
