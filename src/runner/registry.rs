//! Directory of all tasks known to this process.

use std::sync::Arc;

use dashmap::DashMap;

use crate::runner::handle::SubmittedTask;
use crate::task::status::TaskStatus;

/// Concurrent map from task ID to handle — the single source of truth for
/// what is outstanding.
///
/// Entries are created on submit and never reassigned; they are removed by
/// the sweeper's retention policy or when a client retrieves the result.
/// Iteration is weakly consistent: the sweeper snapshots entries and
/// tolerates concurrent insertion and removal.
#[derive(Default)]
pub struct SubmittedTaskRegistry {
    tasks: DashMap<String, Arc<dyn SubmittedTask>>,
}

impl SubmittedTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<dyn SubmittedTask>) {
        self.tasks.insert(handle.task_id().to_string(), handle);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<dyn SubmittedTask>> {
        self.tasks.get(task_id).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, task_id: &str) -> Option<Arc<dyn SubmittedTask>> {
        self.tasks.remove(task_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Weakly-consistent snapshot of all handles.
    pub fn snapshot(&self) -> Vec<Arc<dyn SubmittedTask>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Per-status counts, for monitoring. `unknown` counts degraded
    /// observations, not genuinely failed tasks.
    pub fn summary(&self) -> TaskSummary {
        let mut summary = TaskSummary::default();
        for entry in self.tasks.iter() {
            match entry.value().status() {
                TaskStatus::Queued => summary.queued += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Done => summary.done += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
                TaskStatus::Unknown => summary.unknown += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

/// Counts of registry entries per status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub unknown: usize,
}
