//! Step-executor boundary: the callable contract external workers implement.
//!
//! The engine never interprets a step's input or output beyond forwarding
//! them between dependent steps; the concrete worker implementations (and
//! whatever LLM or storage calls they make) live entirely behind this trait.
//!
//! `StepExecutor` uses RPITIT and so cannot be a trait object directly.
//! `BoxStepExecutor` provides the type-erased form via a blanket-implemented
//! `StepExecutorDyn` with boxed futures, and `ExecutorRegistry` indexes the
//! boxed executors by the string reference steps carry. References are
//! resolved once per job at plan time, not per invocation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors crossing the step-executor boundary.
///
/// `Failed` wraps whatever the collaborator reported; `Timeout` and
/// `Cancelled` are produced by the engine itself.
#[derive(Debug, thiserror::Error)]
pub enum StepExecutorError {
    /// The collaborator reported a failure. Opaque to the engine.
    #[error("step execution failed: {0}")]
    Failed(String),

    /// The step exceeded its configured timeout.
    #[error("step timed out")]
    Timeout,

    /// The step was cancelled cooperatively.
    #[error("step cancelled")]
    Cancelled,
}

impl StepExecutorError {
    /// Whether this error came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepExecutorError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// StepExecutor trait
// ---------------------------------------------------------------------------

/// The contract a worker implements to execute workflow steps.
pub trait StepExecutor: Send + Sync {
    /// Execute one step. `input` is opaque structured data; `timeout` is
    /// advisory (the engine also enforces it externally).
    fn execute(
        &self,
        step_id: &str,
        input: &Value,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, StepExecutorError>> + Send;

    /// Request cooperative cancellation of an in-flight step.
    fn cancel(&self, step_id: &str) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe wrapper
// ---------------------------------------------------------------------------

/// Object-safe version of [`StepExecutor`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch. A blanket
/// implementation is provided for all types implementing `StepExecutor`.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        step_id: &'a str,
        input: &'a Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepExecutorError>> + Send + 'a>>;

    fn cancel_boxed<'a>(&'a self, step_id: &'a str)
    -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Blanket implementation: any `StepExecutor` automatically implements
/// `StepExecutorDyn`.
impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        step_id: &'a str,
        input: &'a Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepExecutorError>> + Send + 'a>> {
        Box::pin(self.execute(step_id, input, timeout))
    }

    fn cancel_boxed<'a>(
        &'a self,
        step_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.cancel(step_id))
    }
}

/// Type-erased step executor for runtime dispatch by executor reference.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn + Send + Sync>,
}

impl BoxStepExecutor {
    /// Wrap a concrete `StepExecutor` in a type-erased box.
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    /// Execute one step through the boundary.
    pub async fn execute(
        &self,
        step_id: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<Value, StepExecutorError> {
        self.inner.execute_boxed(step_id, input, timeout).await
    }

    /// Request cooperative cancellation of an in-flight step.
    pub async fn cancel(&self, step_id: &str) {
        self.inner.cancel_boxed(step_id).await;
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// Registry of step executors, indexed by the `executor` string carried in
/// step definitions.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<BoxStepExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under the given reference name.
    ///
    /// If an executor with this name already exists, it is replaced.
    pub fn register(&mut self, name: impl Into<String>, executor: BoxStepExecutor) {
        self.executors.insert(name.into(), Arc::new(executor));
    }

    /// Whether the given reference resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Look up an executor by reference name.
    pub fn resolve(&self, name: &str) -> Option<Arc<BoxStepExecutor>> {
        self.executors.get(name).cloned()
    }

    /// List all registered reference names.
    pub fn list_names(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl StepExecutor for Echo {
        async fn execute(
            &self,
            step_id: &str,
            input: &Value,
            _timeout: Duration,
        ) -> Result<Value, StepExecutorError> {
            Ok(json!({"step": step_id, "echo": input}))
        }

        async fn cancel(&self, _step_id: &str) {}
    }

    #[tokio::test]
    async fn boxed_executor_delegates() {
        let boxed = BoxStepExecutor::new(Echo);
        let output = boxed
            .execute("gather", &json!({"q": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output["step"], "gather");
        assert_eq!(output["echo"]["q"], 1);
    }

    #[test]
    fn registry_resolves_registered_names() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", BoxStepExecutor::new(Echo));

        assert!(registry.contains("echo"));
        assert!(registry.resolve("echo").is_some());
        assert!(!registry.contains("missing"));
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.list_names(), vec!["echo"]);
    }

    #[test]
    fn registry_replaces_on_duplicate_name() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", BoxStepExecutor::new(Echo));
        registry.register("echo", BoxStepExecutor::new(Echo));
        assert_eq!(registry.list_names().len(), 1);
    }

    #[test]
    fn error_classification() {
        assert!(StepExecutorError::Cancelled.is_cancelled());
        assert!(!StepExecutorError::Timeout.is_cancelled());
        assert!(
            StepExecutorError::Failed("boom".to_string())
                .to_string()
                .contains("boom")
        );
    }
}
