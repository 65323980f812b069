//! Channel naming.
//!
//! Per-task channels are derived purely from the task ID, so any process can
//! reconstruct them from the ID alone.

/// Shared channel all workers consume submissions from.
pub const SUBMISSION: &str = "task.submission";

/// Shared channel for cancel / add-alert requests, keyed by task ID inside
/// the message.
pub const CONTROL: &str = "tasks.control";

/// Shared channel carrying worker capability announcements.
pub const WORKERS: &str = "task.workers";

/// Per-task status transition channel.
pub fn lifecycle(task_id: &str) -> String {
    format!("task.lifecycle.{task_id}")
}

/// Per-task progress line channel.
pub fn progress(task_id: &str) -> String {
    format!("task.progress.{task_id}")
}

/// Per-task terminal result channel (exactly one message per task).
pub fn result(task_id: &str) -> String {
    format!("task.result.{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic_in_task_id() {
        assert_eq!(lifecycle("abc"), "task.lifecycle.abc");
        assert_eq!(progress("abc"), "task.progress.abc");
        assert_eq!(result("abc"), "task.result.abc");
        assert_eq!(lifecycle("abc"), lifecycle("abc"));
    }
}
