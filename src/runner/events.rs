//! Lifecycle event bus.
//!
//! Status transitions publish events here instead of calling consumers
//! directly; the notification dispatcher (and any monitoring code) subscribes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::runner::handle::TaskState;
use crate::task::envelope::TaskEnvelope;
use crate::task::status::TaskStatus;

/// A status transition, as observed in the process that performed it.
///
/// Carries a snapshot of the alert flag and progress lines at transition time
/// so subscribers do not race the task state afterwards.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub envelope: Arc<TaskEnvelope>,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    /// Whether the email alert was armed at the time of the transition.
    pub alert_armed: bool,
    /// Progress lines accumulated up to the transition.
    pub progress: Vec<String>,
}

impl LifecycleEvent {
    pub(crate) fn snapshot(envelope: &Arc<TaskEnvelope>, state: &TaskState) -> Self {
        Self {
            envelope: Arc::clone(envelope),
            status: state.status(),
            at: Utc::now(),
            alert_armed: state.alert_armed(),
            progress: state.progress_lines(),
        }
    }

    pub fn task_id(&self) -> &str {
        self.envelope.task_id()
    }
}

/// Broadcast sender for lifecycle events.
pub type EventBus = broadcast::Sender<LifecycleEvent>;

/// Create an event bus with the given capacity. Slow subscribers that lag
/// behind lose the oldest events, never block publishers.
pub fn event_bus(capacity: usize) -> EventBus {
    let (tx, _) = broadcast::channel(capacity);
    tx
}
