//! Error types for longrun.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Top-level error type for the task runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Work failed: {0}")]
    Work(String),
}

impl Error {
    /// Build a work-body failure from any displayable cause.
    pub fn work(cause: impl std::fmt::Display) -> Self {
        Self::Work(cause.to_string())
    }
}

/// Submission- and lifecycle-related errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Conflicting task {id} submitted at {submitted_at} is still outstanding")]
    Conflicting {
        id: String,
        submitted_at: DateTime<Utc>,
    },

    #[error("No worker available for task type {task_type} and in-process execution is disallowed")]
    NoWorkerAvailable { task_type: String },

    #[error("No unit of work registered for task type {task_type}")]
    UnknownTaskType { task_type: String },

    #[error("Task {id} failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("Task {id} was cancelled")]
    Cancelled { id: String },

    #[error("Timed out after {waited:?} waiting for result of task {id}")]
    ResultTimeout { id: String, waited: Duration },
}

/// Message transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Channel {channel} is closed")]
    ChannelClosed { channel: String },

    #[error("Failed to encode message for channel {channel}: {reason}")]
    Encode { channel: String, reason: String },

    #[error("Failed to decode message from channel {channel}: {reason}")]
    Decode { channel: String, reason: String },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send mail to {address}: {reason}")]
    SendFailed { address: String, reason: String },

    #[error("Invalid mail message: {reason}")]
    InvalidMessage { reason: String },
}

/// Result type alias for the task runner.
pub type Result<T> = std::result::Result<T, Error>;
