//! longrun — submit long-running tasks, track their lifecycle, and collect
//! results from in-process or remote workers.
//!
//! A [`runner::TaskRunningService`] accepts [`task::TaskEnvelope`] submissions
//! paired with a [`task::UnitOfWork`], places each task on the bounded local
//! pool or (when a capable worker is announced) a remote worker reached over a
//! [`remote::Transport`], and tracks every task in a registry until the result
//! is retrieved or the [`runner::MaintenanceSweeper`] reclaims it. Terminal
//! transitions fan out on a broadcast bus, where the
//! [`notify::NotificationDispatcher`] turns armed alerts into mail.

pub mod config;
pub mod error;
pub mod notify;
pub mod remote;
pub mod runner;
pub mod task;

pub use config::{MailConfig, RunnerConfig};
pub use error::{Error, NotifyError, Result, TaskError, TransportError};
pub use runner::{
    LifecycleEvent, MaintenanceSweeper, SubmittedTask, SubmittedTaskRegistry, TaskRunningService,
};
pub use task::{TaskEnvelope, TaskResult, TaskStatus, UnitOfWork, WorkContext, WorkRegistry};
