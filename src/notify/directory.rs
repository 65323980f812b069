//! Resolution of submitter names to mail addresses.

use std::collections::HashMap;

use async_trait::async_trait;

/// Maps a submitter identifier to a deliverable address. A `None` means the
/// submitter has no known address; the dispatcher skips the notification.
#[async_trait]
pub trait EmailDirectory: Send + Sync {
    async fn resolve_email(&self, submitter: &str) -> Option<String>;
}

/// Fixed in-memory directory, for small deployments and tests.
#[derive(Default)]
pub struct StaticEmailDirectory {
    addresses: HashMap<String, String>,
}

impl StaticEmailDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, submitter: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(submitter.into(), address.into());
        self
    }
}

#[async_trait]
impl EmailDirectory for StaticEmailDirectory {
    async fn resolve_email(&self, submitter: &str) -> Option<String> {
        self.addresses.get(submitter).cloned()
    }
}
