//! Client side of remote execution — submission publishing and proxy handles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, TaskError};
use crate::remote::channels;
use crate::remote::messages::{
    self, ControlMessage, ControlRequest, LifecycleMessage, ProgressMessage, SubmissionMessage,
    WorkerAnnouncement,
};
use crate::remote::transport::Transport;
use crate::runner::handle::{SubmittedTask, TaskState};
use crate::task::envelope::{TaskEnvelope, TaskResult};
use crate::task::status::TaskStatus;

/// How long a blocking result wait listens before re-checking the lifecycle
/// channel for a cancellation.
const RESULT_POLL_SLICE: Duration = Duration::from_millis(200);

/// Publishes task envelopes onto the shared submission channel and hands out
/// proxy handles. Worker capabilities are learned from announcements drained
/// off the shared `task.workers` channel.
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    known_types: RwLock<HashSet<String>>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            known_types: RwLock::new(HashSet::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_reachable(&self) -> bool {
        self.transport.is_reachable()
    }

    /// Whether any announced worker services the given task type. Drains
    /// pending announcements first, so a freshly started worker is visible.
    pub fn can_service(&self, task_type: &str) -> bool {
        self.refresh_capabilities();
        self.known_types.read().unwrap().contains(task_type)
    }

    fn refresh_capabilities(&self) {
        loop {
            match self.transport.try_receive(channels::WORKERS) {
                Ok(Some(bytes)) => {
                    match messages::decode::<WorkerAnnouncement>(channels::WORKERS, &bytes) {
                        Ok(announcement) => {
                            tracing::debug!(
                                worker_id = %announcement.worker_id,
                                types = ?announcement.task_types,
                                "worker announced"
                            );
                            self.known_types
                                .write()
                                .unwrap()
                                .extend(announcement.task_types);
                        }
                        Err(e) => tracing::warn!(error = %e, "bad worker announcement"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot refresh worker capabilities");
                    break;
                }
            }
        }
    }

    /// Publish the envelope for an external worker and return the proxy
    /// handle tracking it.
    pub async fn submit(&self, envelope: Arc<TaskEnvelope>) -> Result<Arc<RemoteTaskProxy>> {
        let message = SubmissionMessage {
            envelope: (*envelope).clone(),
        };
        self.transport
            .publish(
                channels::SUBMISSION,
                messages::encode(channels::SUBMISSION, &message)?,
            )
            .await?;

        tracing::info!(
            task_id = %envelope.task_id(),
            task_type = %envelope.task_type(),
            "task submitted to remote workers"
        );
        Ok(Arc::new(RemoteTaskProxy::new(
            envelope,
            Arc::clone(&self.transport),
        )))
    }
}

/// Client-side stand-in for a task executing in another process.
///
/// Reconstructs task state lazily: every status or progress read first drains
/// the per-task channels (non-blocking), applying transitions idempotently —
/// duplicate or stale transitions are no-ops. Only `await_result` blocks.
pub struct RemoteTaskProxy {
    envelope: Arc<TaskEnvelope>,
    transport: Arc<dyn Transport>,
    state: Arc<TaskState>,
    lifecycle_channel: String,
    progress_channel: String,
    result_channel: String,
    /// Set while the last drain attempt could not reach the transport; the
    /// status observation degrades to Unknown until a drain succeeds.
    sync_failed: AtomicBool,
}

impl RemoteTaskProxy {
    pub(crate) fn new(envelope: Arc<TaskEnvelope>, transport: Arc<dyn Transport>) -> Self {
        let id = envelope.task_id().to_string();
        let state = Arc::new(TaskState::new(envelope.email_on_completion()));
        Self {
            envelope,
            transport,
            state,
            lifecycle_channel: channels::lifecycle(&id),
            progress_channel: channels::progress(&id),
            result_channel: channels::result(&id),
            sync_failed: AtomicBool::new(false),
        }
    }

    /// Drain pending lifecycle, progress and result messages.
    fn sync(&self) {
        if let Err(e) = self.try_sync() {
            tracing::warn!(
                task_id = %self.envelope.task_id(),
                error = %e,
                "cannot sync remote task state; status unknown"
            );
            self.sync_failed.store(true, Ordering::SeqCst);
        } else {
            self.sync_failed.store(false, Ordering::SeqCst);
        }
    }

    fn try_sync(&self) -> Result<()> {
        while let Some(bytes) = self.transport.try_receive(&self.lifecycle_channel)? {
            let msg: LifecycleMessage = messages::decode(&self.lifecycle_channel, &bytes)?;
            // Already-observed or older statuses fail the transition check
            // and are ignored.
            self.state.transition_at(msg.status, msg.at);
        }

        while let Some(bytes) = self.transport.try_receive(&self.progress_channel)? {
            let msg: ProgressMessage = messages::decode(&self.progress_channel, &bytes)?;
            self.state.progress_log().push(msg.line);
        }

        if let Some(bytes) = self.transport.try_receive(&self.result_channel)? {
            let result: TaskResult = messages::decode(&self.result_channel, &bytes)?;
            self.apply_result(result);
        }
        Ok(())
    }

    /// Reconcile the mirrored state with a received terminal result. The
    /// lifecycle channel may lag the result channel, so missing transitions
    /// are applied here.
    fn apply_result(&self, result: TaskResult) {
        let terminal = if result.is_failure() {
            TaskStatus::Failed
        } else {
            TaskStatus::Done
        };
        self.state.transition(TaskStatus::Running);
        self.state.transition_at(terminal, result.finished_at);
        self.state.store_result(result);
    }
}

#[async_trait]
impl SubmittedTask for RemoteTaskProxy {
    fn envelope(&self) -> &Arc<TaskEnvelope> {
        &self.envelope
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn status(&self) -> TaskStatus {
        self.sync();
        if self.sync_failed.load(Ordering::SeqCst) {
            TaskStatus::Unknown
        } else {
            self.state.status()
        }
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.started_at()
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.finished_at()
    }

    fn progress_lines(&self) -> Vec<String> {
        self.sync();
        self.state.progress_lines()
    }

    fn alert_armed(&self) -> bool {
        self.state.alert_armed()
    }

    async fn arm_email_alert(&self) -> Result<()> {
        self.state.arm_email_alert();
        let msg = ControlMessage {
            task_id: self.envelope.task_id().to_string(),
            request: ControlRequest::AddEmailAlert,
        };
        self.transport
            .publish(channels::CONTROL, messages::encode(channels::CONTROL, &msg)?)
            .await?;
        Ok(())
    }

    async fn request_cancel(&self) -> bool {
        self.state.mark_cancel_requested();
        let msg = ControlMessage {
            task_id: self.envelope.task_id().to_string(),
            request: ControlRequest::Cancel,
        };
        let encoded = match messages::encode(channels::CONTROL, &msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode cancel request");
                return false;
            }
        };
        match self.transport.publish(channels::CONTROL, encoded).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    task_id = %self.envelope.task_id(),
                    error = %e,
                    "cancel request not accepted by transport"
                );
                false
            }
        }
    }

    fn check_result(&self) -> Option<TaskResult> {
        self.sync();
        self.state.take_result()
    }

    async fn await_result(&self, timeout: Option<Duration>) -> Result<TaskResult> {
        let task_id = self.envelope.task_id().to_string();
        let started = Instant::now();

        loop {
            if let Some(result) = self.state.take_result() {
                if let Some(reason) = result.failure.clone() {
                    return Err(TaskError::Failed {
                        id: task_id,
                        reason,
                    }
                    .into());
                }
                return Ok(result);
            }
            if self.state.status() == TaskStatus::Cancelled {
                return Err(TaskError::Cancelled { id: task_id }.into());
            }

            let remaining = match timeout {
                None => RESULT_POLL_SLICE,
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Err(TaskError::ResultTimeout {
                            id: task_id,
                            waited: limit,
                        }
                        .into());
                    }
                    (limit - elapsed).min(RESULT_POLL_SLICE)
                }
            };

            match self
                .transport
                .receive(&self.result_channel, Some(remaining))
                .await?
            {
                Some(bytes) => {
                    let result: TaskResult = messages::decode(&self.result_channel, &bytes)?;
                    self.apply_result(result);
                }
                // Slice elapsed; drain the lifecycle channel so a
                // cancellation is observed on the next pass.
                None => self.sync(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::transport::InMemoryBroker;

    fn proxy_fixture() -> (Arc<InMemoryBroker>, RemoteTaskProxy, String) {
        let broker = Arc::new(InMemoryBroker::new());
        let envelope = Arc::new(TaskEnvelope::new("alice", "aligner"));
        let id = envelope.task_id().to_string();
        let proxy = RemoteTaskProxy::new(envelope, broker.clone() as Arc<dyn Transport>);
        (broker, proxy, id)
    }

    async fn publish_lifecycle(broker: &InMemoryBroker, id: &str, status: TaskStatus) {
        let msg = LifecycleMessage {
            task_id: id.to_string(),
            status,
            at: Utc::now(),
        };
        broker
            .publish(
                &channels::lifecycle(id),
                messages::encode(&channels::lifecycle(id), &msg).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lazy_drain_applies_transitions_in_order() {
        let (broker, proxy, id) = proxy_fixture();
        assert_eq!(proxy.status(), TaskStatus::Queued);

        publish_lifecycle(&broker, &id, TaskStatus::Running).await;
        assert_eq!(proxy.status(), TaskStatus::Running);
        assert!(proxy.started_at().is_some());

        publish_lifecycle(&broker, &id, TaskStatus::Done).await;
        assert_eq!(proxy.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn stale_and_duplicate_transitions_are_ignored() {
        let (broker, proxy, id) = proxy_fixture();
        publish_lifecycle(&broker, &id, TaskStatus::Running).await;
        publish_lifecycle(&broker, &id, TaskStatus::Done).await;
        // Duplicate terminal and stale Running observations.
        publish_lifecycle(&broker, &id, TaskStatus::Done).await;
        publish_lifecycle(&broker, &id, TaskStatus::Running).await;
        assert_eq!(proxy.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn transport_outage_degrades_to_unknown() {
        let (broker, proxy, id) = proxy_fixture();
        publish_lifecycle(&broker, &id, TaskStatus::Running).await;
        assert_eq!(proxy.status(), TaskStatus::Running);

        broker.close();
        assert_eq!(proxy.status(), TaskStatus::Unknown);

        // Recovered transport restores the real observation.
        broker.reopen();
        assert_eq!(proxy.status(), TaskStatus::Running);
    }

    #[tokio::test]
    async fn result_arrival_unblocks_waiter() {
        let (broker, proxy, id) = proxy_fixture();
        publish_lifecycle(&broker, &id, TaskStatus::Running).await;

        let result = TaskResult::success(&id, serde_json::json!([1, 2]), true);
        broker
            .publish(
                &channels::result(&id),
                messages::encode(&channels::result(&id), &result).unwrap(),
            )
            .await
            .unwrap();

        let got = proxy
            .await_result(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(got.answer, serde_json::json!([1, 2]));
        assert!(got.ran_remotely);
        assert_eq!(proxy.state.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn capability_announcements_feed_placement() {
        let broker = Arc::new(InMemoryBroker::new());
        let executor = RemoteExecutor::new(broker.clone() as Arc<dyn Transport>);
        assert!(!executor.can_service("aligner"));

        let announcement = WorkerAnnouncement {
            worker_id: "w1".to_string(),
            task_types: vec!["aligner".to_string()],
        };
        broker
            .publish(
                channels::WORKERS,
                messages::encode(channels::WORKERS, &announcement).unwrap(),
            )
            .await
            .unwrap();

        assert!(executor.can_service("aligner"));
        assert!(!executor.can_service("folder"));
    }
}
