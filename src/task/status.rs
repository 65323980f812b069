//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Status of a submitted task.
///
/// `Queued` is the initial status; `Done`, `Failed` and `Cancelled` are
/// terminal. `Unknown` is a degraded *observation* — it is what a reader
/// reports when it cannot determine the real status (e.g. the transport is
/// down while syncing a remote proxy). It is never stored as a lifecycle
/// state and no transition leads into or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, waiting to be picked up.
    Queued,
    /// A worker is executing the task body.
    Running,
    /// Finished successfully.
    Done,
    /// The task body raised a failure.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
    /// Current status cannot be determined by this observer.
    Unknown,
}

impl TaskStatus {
    /// Check whether the state machine permits moving from `self` to `target`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Queued, Cancelled) |
            (Running, Done) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal status (no further transitions occur).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is still outstanding (neither terminal nor Unknown).
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_valid() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Done));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn transitions_invalid() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn unknown_is_not_a_lifecycle_state() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert!(!status.can_transition_to(TaskStatus::Unknown));
            assert!(!TaskStatus::Unknown.can_transition_to(status));
        }
        assert!(!TaskStatus::Unknown.is_terminal());
        assert!(!TaskStatus::Unknown.is_outstanding());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn status_display() {
        assert_eq!(TaskStatus::Queued.to_string(), "queued");
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(TaskStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::Running);
    }
}
