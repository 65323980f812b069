//! Task running — service façade, registry, handles, lifecycle-wrapped
//! execution, the local worker pool, and the maintenance sweeper.
//!
//! Core components:
//! - `events` — lifecycle event broadcast bus
//! - `handle` — `SubmittedTask` trait, shared `TaskState`, local handle
//! - `executing` — `ExecutingTask` lifecycle wrapper (setup → run → teardown)
//! - `local` — bounded in-process worker pool
//! - `registry` — concurrent directory of outstanding tasks
//! - `service` — `TaskRunningService`, the only entry point collaborators call
//! - `sweeper` — periodic queue-wait / run-duration / retention enforcement

pub mod events;
pub mod executing;
pub mod handle;
pub mod local;
pub mod registry;
pub mod service;
pub mod sweeper;

pub use events::{EventBus, LifecycleEvent, event_bus};
pub use executing::ExecutingTask;
pub use handle::{LocalTaskHandle, SubmittedTask, TaskState};
pub use local::LocalExecutor;
pub use registry::{SubmittedTaskRegistry, TaskSummary};
pub use service::{ConflictPolicy, Placement, TaskRunningService, TaskView, TypeAndSubmitterPolicy};
pub use sweeper::MaintenanceSweeper;
