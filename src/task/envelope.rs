//! Task envelope and result records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque authorization context propagated with a task.
///
/// Carried explicitly in the envelope instead of thread-local state so that
/// re-establishing it on a remote worker is an explicit, testable step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialContext {
    token: Option<String>,
}

impl CredentialContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// An unauthenticated context.
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Immutable description of a task submission.
///
/// The task ID is generated here, never supplied by the caller. The
/// submission timestamp is stamped exactly once by the running service when
/// the envelope is accepted; after that the envelope offers no mutation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_id: String,
    submitter: String,
    task_type: String,
    submitted_at: Option<DateTime<Utc>>,
    max_queue: Option<Duration>,
    max_run: Option<Duration>,
    allow_in_process: bool,
    persist_details: bool,
    email_on_completion: bool,
    credentials: CredentialContext,
    /// Opaque parameter blob handed to the unit-of-work factory on a worker.
    payload: serde_json::Value,
}

impl TaskEnvelope {
    /// Create a new envelope for a submitter and declared unit-of-work type.
    pub fn new(submitter: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            submitter: submitter.into(),
            task_type: task_type.into(),
            submitted_at: None,
            max_queue: None,
            max_run: None,
            allow_in_process: true,
            persist_details: false,
            email_on_completion: false,
            credentials: CredentialContext::anonymous(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_max_queue(mut self, max_queue: Duration) -> Self {
        self.max_queue = Some(max_queue);
        self
    }

    pub fn with_max_run(mut self, max_run: Duration) -> Self {
        self.max_run = Some(max_run);
        self
    }

    /// Whether this task may run inside the submitting process. Setting this
    /// to `false` makes remote placement mandatory.
    pub fn with_in_process_allowed(mut self, allowed: bool) -> Self {
        self.allow_in_process = allowed;
        self
    }

    pub fn with_persist_details(mut self, persist: bool) -> Self {
        self.persist_details = persist;
        self
    }

    pub fn with_email_on_completion(mut self, email: bool) -> Self {
        self.email_on_completion = email;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialContext) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn submitter(&self) -> &str {
        &self.submitter
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Submission timestamp; `None` until the service accepts the envelope.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    /// Maximum queued duration, if the submitter set one. The runner falls
    /// back to its configured default otherwise.
    pub fn max_queue(&self) -> Option<Duration> {
        self.max_queue
    }

    /// Maximum running duration, if the submitter set one.
    pub fn max_run(&self) -> Option<Duration> {
        self.max_run
    }

    pub fn allow_in_process(&self) -> bool {
        self.allow_in_process
    }

    pub fn persist_details(&self) -> bool {
        self.persist_details
    }

    pub fn email_on_completion(&self) -> bool {
        self.email_on_completion
    }

    pub fn credentials(&self) -> &CredentialContext {
        &self.credentials
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Stamp the submission time. Only the first call has any effect.
    pub(crate) fn stamp_submitted(&mut self) {
        if self.submitted_at.is_none() {
            self.submitted_at = Some(Utc::now());
        }
    }
}

/// The terminal outcome of a task. Built exactly once, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    /// Opaque answer payload produced by the unit of work.
    pub answer: serde_json::Value,
    /// Failure cause, if the task body failed.
    pub failure: Option<String>,
    /// Whether the task was executed by a remote worker.
    pub ran_remotely: bool,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        task_id: impl Into<String>,
        answer: serde_json::Value,
        ran_remotely: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            answer,
            failure: None,
            ran_remotely,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        reason: impl Into<String>,
        ran_remotely: bool,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            answer: serde_json::Value::Null,
            failure: Some(reason.into()),
            ran_remotely,
            finished_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}
