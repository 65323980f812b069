//! Message transport abstraction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::TransportError;

/// A durable point-to-point message queue mechanism.
///
/// Channels are named, created on first use, and preserve per-channel FIFO
/// ordering. Any broker with these properties satisfies the contract; the
/// wire encoding is opaque bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append a message to a channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next message, waiting up to `deadline` (forever if
    /// `None`). Returns `Ok(None)` when the deadline elapses with nothing to
    /// deliver.
    async fn receive(
        &self,
        channel: &str,
        deadline: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Non-blocking receive: the next pending message, or `None`.
    fn try_receive(&self, channel: &str) -> Result<Option<Vec<u8>>, TransportError>;

    /// Whether the broker is currently reachable.
    fn is_reachable(&self) -> bool;
}

struct ChannelQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
}

impl ChannelQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
        }
    }
}

/// In-process broker of named FIFO queues.
///
/// Useful as the transport when client and worker share a process, and as the
/// test double for any external broker. `close()` simulates an outage: every
/// subsequent operation fails until `reopen()`.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: DashMap<String, Arc<ChannelQueue>>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, channel: &str) -> Arc<ChannelQueue> {
        self.queues
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(ChannelQueue::new()))
            .clone()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable {
                reason: "broker closed".to_string(),
            });
        }
        Ok(())
    }

    /// Simulate a broker outage.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Number of messages pending on a channel.
    pub fn depth(&self, channel: &str) -> usize {
        self.queues
            .get(channel)
            .map(|q| q.items.lock().unwrap().len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check_open()?;
        let queue = self.queue(channel);
        queue.items.lock().unwrap().push_back(payload);
        queue.ready.notify_one();
        Ok(())
    }

    async fn receive(
        &self,
        channel: &str,
        deadline: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.check_open()?;
        let queue = self.queue(channel);

        let next = async {
            loop {
                let notified = queue.ready.notified();
                if let Some(item) = queue.items.lock().unwrap().pop_front() {
                    return item;
                }
                notified.await;
            }
        };

        match deadline {
            None => Ok(Some(next.await)),
            Some(limit) => Ok(tokio::time::timeout(limit, next).await.ok()),
        }
    }

    fn try_receive(&self, channel: &str) -> Result<Option<Vec<u8>>, TransportError> {
        self.check_open()?;
        Ok(self.queue(channel).items.lock().unwrap().pop_front())
    }

    fn is_reachable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
