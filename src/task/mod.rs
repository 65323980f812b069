//! Task data model — envelope, status state machine, unit-of-work contract,
//! and progress sinks.
//!
//! Core components:
//! - `envelope` — `TaskEnvelope` (immutable submission record) and `TaskResult`
//! - `status` — lifecycle state machine (Queued → Running → Done/Failed/Cancelled)
//! - `work` — `UnitOfWork` trait and the type-tag → factory `WorkRegistry`
//! - `progress` — append-only progress line sinks (local buffer or forwarded)

pub mod envelope;
pub mod progress;
pub mod status;
pub mod work;

pub use envelope::{CredentialContext, TaskEnvelope, TaskResult};
pub use progress::{BufferedProgressSink, ProgressSink};
pub use status::TaskStatus;
pub use work::{UnitOfWork, WorkContext, WorkRegistry};
