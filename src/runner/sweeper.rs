//! Periodic maintenance over the submitted-task registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::runner::handle::SubmittedTask;
use crate::runner::service::TaskRunningService;
use crate::task::status::TaskStatus;

/// Walks the registry on an interval and enforces per-task time limits:
/// tasks queued or running past their limit are cancelled (with the email
/// alert armed first, so the submitter hears about it), and terminal tasks
/// past the retention window are dropped from tracking.
///
/// One misbehaving handle never stops the sweep; errors are logged and the
/// walk continues.
pub struct MaintenanceSweeper {
    service: Arc<TaskRunningService>,
    config: RunnerConfig,
}

impl MaintenanceSweeper {
    pub fn new(service: Arc<TaskRunningService>) -> Self {
        let config = service.config().clone();
        Self { service, config }
    }

    /// Start the periodic sweep loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            // The first tick fires immediately; skip it so a fresh service is
            // not swept before anything has had a chance to run.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One full pass over the registry.
    pub async fn sweep(&self) {
        let handles = self.service.registry().snapshot();
        tracing::debug!(tracked = handles.len(), "maintenance sweep");
        for handle in handles {
            self.examine(handle.as_ref()).await;
        }
    }

    async fn examine(&self, handle: &dyn SubmittedTask) {
        let now = Utc::now();
        match handle.status() {
            TaskStatus::Queued => {
                let Some(submitted_at) = handle.envelope().submitted_at() else {
                    return;
                };
                let limit = handle
                    .envelope()
                    .max_queue()
                    .unwrap_or(self.config.default_max_queue);
                if exceeds(now.signed_duration_since(submitted_at), limit) {
                    tracing::warn!(
                        task_id = %handle.task_id(),
                        limit = ?limit,
                        "task queued past its limit; cancelling"
                    );
                    self.expire(handle).await;
                }
            }
            TaskStatus::Running => {
                let Some(started_at) = handle.started_at() else {
                    return;
                };
                let limit = handle
                    .envelope()
                    .max_run()
                    .unwrap_or(self.config.default_max_run);
                if exceeds(now.signed_duration_since(started_at), limit) {
                    tracing::warn!(
                        task_id = %handle.task_id(),
                        limit = ?limit,
                        "task running past its limit; cancelling"
                    );
                    self.expire(handle).await;
                }
            }
            status if status.is_terminal() => {
                let Some(finished_at) = handle.finished_at() else {
                    return;
                };
                if exceeds(
                    now.signed_duration_since(finished_at),
                    self.config.retention_window,
                ) {
                    tracing::debug!(task_id = %handle.task_id(), "reclaiming terminal task");
                    self.service.registry().remove(handle.task_id());
                }
            }
            // Unknown means the status could not be observed; leave the task
            // alone until a later sweep can see it.
            _ => {}
        }
    }

    /// Cancel a task that exceeded its limit. The alert is armed first so the
    /// eventual terminal event notifies the submitter.
    async fn expire(&self, handle: &dyn SubmittedTask) {
        if let Err(e) = handle.arm_email_alert().await {
            tracing::warn!(task_id = %handle.task_id(), error = %e, "could not arm alert");
        }
        if !handle.request_cancel().await {
            tracing::warn!(task_id = %handle.task_id(), "cancel request not accepted");
        }
    }
}

fn exceeds(elapsed: chrono::Duration, limit: Duration) -> bool {
    match chrono::Duration::from_std(limit) {
        Ok(limit) => elapsed > limit,
        Err(_) => false,
    }
}
