//! Wire messages crossing the transport.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::task::envelope::TaskEnvelope;
use crate::task::status::TaskStatus;

/// A task handed to the remote worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMessage {
    pub envelope: TaskEnvelope,
}

/// A status transition, published to the per-task lifecycle channel in the
/// order transitions occur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleMessage {
    pub task_id: String,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

/// One progress line, published to the per-task progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub task_id: String,
    pub line: String,
}

/// Request kinds carried on the shared control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRequest {
    Cancel,
    AddEmailAlert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub task_id: String,
    pub request: ControlRequest,
}

/// Capability announcement a worker publishes at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAnnouncement {
    pub worker_id: String,
    pub task_types: Vec<String>,
}

/// Encode a message for a channel.
pub fn encode<T: Serialize>(channel: &str, message: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|e| TransportError::Encode {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a message received from a channel.
pub fn decode<T: DeserializeOwned>(channel: &str, bytes: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(bytes).map_err(|e| TransportError::Decode {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}
