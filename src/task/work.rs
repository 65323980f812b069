//! Unit-of-work contract and the task-type registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, TaskError};
use crate::task::envelope::{CredentialContext, TaskEnvelope};
use crate::task::progress::ProgressSink;

/// Everything a task body may draw on while executing: its ID, the propagated
/// authorization context, and a progress sink. Passed explicitly so remote
/// re-establishment of credentials is visible in the call, not hidden in
/// thread-local state.
pub struct WorkContext {
    task_id: String,
    credentials: CredentialContext,
    progress: Arc<dyn ProgressSink>,
}

impl WorkContext {
    pub fn new(
        task_id: impl Into<String>,
        credentials: CredentialContext,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            credentials,
            progress,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn credentials(&self) -> &CredentialContext {
        &self.credentials
    }

    /// Append a progress line. Advisory, at-least-once, in emission order.
    pub async fn progress(&self, line: impl Into<String>) {
        self.progress.append(&line.into()).await;
    }
}

/// The executable abstraction a client provides.
///
/// A unit of work receives no input beyond what was embedded at construction
/// time plus the [`WorkContext`]; it returns an opaque answer payload or a
/// failure. Long-running bodies should return promptly once their future is
/// dropped — cancellation aborts the executing task at its next await point.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Declared type tag, used for conflict detection and remote dispatch.
    fn task_type(&self) -> &str;

    async fn execute(&self, ctx: &WorkContext) -> Result<serde_json::Value>;
}

impl std::fmt::Debug for dyn UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("task_type", &self.task_type())
            .finish()
    }
}

type WorkFactory = Box<dyn Fn(&TaskEnvelope) -> Arc<dyn UnitOfWork> + Send + Sync>;

/// Explicit map from a task-type tag to a unit-of-work factory, populated at
/// process start. A worker resolves incoming envelopes through this registry;
/// a missing mapping is [`TaskError::UnknownTaskType`].
#[derive(Default)]
pub struct WorkRegistry {
    factories: RwLock<HashMap<String, WorkFactory>>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a task type, replacing any previous one.
    pub fn register<F>(&self, task_type: impl Into<String>, factory: F)
    where
        F: Fn(&TaskEnvelope) -> Arc<dyn UnitOfWork> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap()
            .insert(task_type.into(), Box::new(factory));
    }

    /// Build the unit of work for an envelope's declared type.
    pub fn resolve(&self, envelope: &TaskEnvelope) -> Result<Arc<dyn UnitOfWork>> {
        let factories = self.factories.read().unwrap();
        let factory = factories.get(envelope.task_type()).ok_or_else(|| {
            TaskError::UnknownTaskType {
                task_type: envelope.task_type().to_string(),
            }
        })?;
        Ok(factory(envelope))
    }

    /// Type tags this registry can service, for worker capability announcements.
    pub fn serviceable_types(&self) -> Vec<String> {
        self.factories.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::progress::BufferedProgressSink;

    struct Doubler {
        input: i64,
    }

    #[async_trait]
    impl UnitOfWork for Doubler {
        fn task_type(&self) -> &str {
            "doubler"
        }

        async fn execute(&self, ctx: &WorkContext) -> Result<serde_json::Value> {
            ctx.progress("doubling").await;
            Ok(serde_json::json!(self.input * 2))
        }
    }

    #[tokio::test]
    async fn registry_resolves_registered_type() {
        let registry = WorkRegistry::new();
        registry.register("doubler", |env| {
            let input = env.payload().as_i64().unwrap_or(0);
            Arc::new(Doubler { input }) as Arc<dyn UnitOfWork>
        });

        let env = TaskEnvelope::new("alice", "doubler").with_payload(serde_json::json!(21));
        let work = registry.resolve(&env).unwrap();
        assert_eq!(work.task_type(), "doubler");

        let sink = Arc::new(BufferedProgressSink::new());
        let ctx = WorkContext::new(env.task_id(), env.credentials().clone(), sink);
        let answer = work.execute(&ctx).await.unwrap();
        assert_eq!(answer, serde_json::json!(42));
    }

    #[test]
    fn registry_unknown_type() {
        let registry = WorkRegistry::new();
        let env = TaskEnvelope::new("alice", "mystery");
        let err = registry.resolve(&env).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Task(TaskError::UnknownTaskType { ref task_type }) if task_type == "mystery"
        ));
    }

    #[test]
    fn serviceable_types_lists_registrations() {
        let registry = WorkRegistry::new();
        registry.register("a", |_| Arc::new(Doubler { input: 0 }) as Arc<dyn UnitOfWork>);
        registry.register("b", |_| Arc::new(Doubler { input: 0 }) as Arc<dyn UnitOfWork>);
        let mut types = registry.serviceable_types();
        types.sort();
        assert_eq!(types, vec!["a", "b"]);
    }
}
