//! Bridges the lifecycle event bus to outbound mail.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::notify::directory::EmailDirectory;
use crate::notify::mail::MailSender;
use crate::runner::events::LifecycleEvent;

/// Listens for terminal lifecycle events and mails the submitter when the
/// task asked to be notified. Execution code never calls this directly; the
/// only coupling is the broadcast bus.
pub struct NotificationDispatcher {
    directory: Arc<dyn EmailDirectory>,
    mailer: Arc<dyn MailSender>,
}

impl NotificationDispatcher {
    pub fn new(directory: Arc<dyn EmailDirectory>, mailer: Arc<dyn MailSender>) -> Self {
        Self { directory, mailer }
    }

    /// Consume events until the bus closes. A lagging receiver drops the
    /// oldest events and keeps going.
    pub fn spawn(self, mut rx: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "notification dispatcher lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("lifecycle bus closed; dispatcher stopping");
                        return;
                    }
                }
            }
        })
    }

    async fn handle(&self, event: LifecycleEvent) {
        if !event.status.is_terminal() || !event.alert_armed {
            return;
        }

        let submitter = event.envelope.submitter();
        let Some(address) = self.directory.resolve_email(submitter).await else {
            tracing::debug!(submitter, "no mail address; skipping notification");
            return;
        };

        let subject = format!(
            "Task {} {}",
            event.envelope.task_type(),
            event.status
        );
        let mut body = format!(
            "Task {} ({}) finished with status: {}.\n",
            event.task_id(),
            event.envelope.task_type(),
            event.status
        );
        if !event.progress.is_empty() {
            body.push_str("\nProgress log:\n");
            for line in &event.progress {
                body.push_str(line);
                body.push('\n');
            }
        }

        if let Err(e) = self.mailer.send(&address, &subject, &body).await {
            tracing::warn!(
                task_id = %event.task_id(),
                address = %address,
                error = %e,
                "notification mail failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::NotifyError;
    use crate::notify::directory::StaticEmailDirectory;
    use crate::runner::events::event_bus;
    use crate::runner::handle::TaskState;
    use crate::task::envelope::TaskEnvelope;
    use crate::task::status::TaskStatus;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    fn terminal_event(alert: bool) -> LifecycleEvent {
        let envelope = Arc::new(TaskEnvelope::new("alice", "genome-align"));
        let state = TaskState::new(alert);
        state.progress_log().push("aligned 10 contigs");
        state.transition(TaskStatus::Running);
        state.transition(TaskStatus::Done);
        LifecycleEvent::snapshot(&envelope, &state)
    }

    async fn dispatch_one(event: LifecycleEvent) -> Arc<RecordingMailer> {
        let mailer = Arc::new(RecordingMailer::default());
        let directory = Arc::new(StaticEmailDirectory::new().with("alice", "alice@example.org"));
        let dispatcher = NotificationDispatcher::new(directory, Arc::clone(&mailer) as _);

        let bus = event_bus(16);
        let worker = dispatcher.spawn(bus.subscribe());
        bus.send(event).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.abort();
        mailer
    }

    #[tokio::test]
    async fn terminal_event_with_alert_sends_one_mail() {
        let mailer = dispatch_one(terminal_event(true)).await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, subject, body) = &sent[0];
        assert_eq!(to, "alice@example.org");
        assert!(subject.contains("genome-align"));
        assert!(subject.contains("done"));
        assert!(body.contains("aligned 10 contigs"));
    }

    #[tokio::test]
    async fn unarmed_event_is_ignored() {
        let mailer = dispatch_one(terminal_event(false)).await;
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_terminal_event_is_ignored() {
        let envelope = Arc::new(TaskEnvelope::new("alice", "genome-align"));
        let state = TaskState::new(true);
        state.transition(TaskStatus::Running);
        let event = LifecycleEvent::snapshot(&envelope, &state);

        let mailer = dispatch_one(event).await;
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_submitter_is_skipped_silently() {
        let mailer = Arc::new(RecordingMailer::default());
        let directory = Arc::new(StaticEmailDirectory::new());
        let dispatcher = NotificationDispatcher::new(directory, Arc::clone(&mailer) as _);

        let bus = event_bus(16);
        let worker = dispatcher.spawn(bus.subscribe());
        bus.send(terminal_event(true)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.abort();
        assert!(mailer.sent.lock().unwrap().is_empty());
    }
}
