//! Remote execution over a message transport.
//!
//! Core components:
//! - `transport` — the durable point-to-point queue abstraction and an
//!   in-memory broker implementation
//! - `channels` — channel names, derived deterministically from the task ID
//! - `messages` — serde wire messages
//! - `executor` — client side: publish submissions, proxy handles
//! - `worker` — worker side: consume submissions, run, publish back

pub mod channels;
pub mod executor;
pub mod messages;
pub mod transport;
pub mod worker;

pub use executor::{RemoteExecutor, RemoteTaskProxy};
pub use transport::{InMemoryBroker, Transport};
pub use worker::{TaskWorker, WorkerHandle};
