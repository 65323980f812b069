//! Progress sinks — append-only destinations for progress text lines.

use std::sync::RwLock;

use async_trait::async_trait;

/// Append-only destination for progress lines emitted during execution.
///
/// Lines are advisory: delivery is at-least-once, but any single reader
/// observes them in emission order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn append(&self, line: &str);
}

/// In-memory progress buffer. Doubles as the accumulated progress log of a
/// task handle — the sink is attached for the duration of execution and the
/// buffer remains readable afterwards.
#[derive(Debug, Default)]
pub struct BufferedProgressSink {
    lines: RwLock<Vec<String>>,
}

impl BufferedProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines accumulated so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().unwrap().is_empty()
    }

    /// Synchronous append, for callers that already hold a line (e.g. a proxy
    /// draining a progress channel).
    pub fn push(&self, line: impl Into<String>) {
        self.lines.write().unwrap().push(line.into());
    }
}

#[async_trait]
impl ProgressSink for BufferedProgressSink {
    async fn append(&self, line: &str) {
        self.push(line);
    }
}
