//! The engine handle and its operation registry.
//!
//! An [`Engine`] is what a transport adapter holds on to: it owns the
//! configuration and the registered [`Operation`]s, creates one
//! [`ExecutionContext`] per invocation, and is passed to every step as the
//! engine handle.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::Instrument;

use crate::step::{SharedStep, Step};
use crate::{EngineConfig, Error, ExecutionContext, Result};

/// A named pipeline exposed by an engine.
///
/// # Example
///
/// ```rust
/// use bauta::{pipe, steps, Engine, Operation, SyncStep};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let engine = Engine::builder()
///     .operation(Operation::new("findCat", pipe(steps![
///         SyncStep::new(|id, _, _| Ok(json!({ "id": id, "name": "Tom" }))),
///     ])))
///     .build();
///
/// let cat = engine.run("findCat", json!(1)).await.unwrap();
/// assert_eq!(cat["name"], "Tom");
/// # });
/// ```
#[derive(Clone)]
pub struct Operation {
    id: String,
    step: SharedStep,
    deprecated: bool,
}

impl Operation {
    /// Create an operation running `step`.
    pub fn new<S: Step + 'static>(id: impl Into<String>, step: S) -> Self {
        Self {
            id: id.into(),
            step: Arc::new(step),
            deprecated: false,
        }
    }

    /// Mark the operation as deprecated; invoking it logs a warning.
    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    /// The operation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the operation is deprecated.
    pub fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    /// Access the operation's step.
    pub fn step(&self) -> &SharedStep {
        &self.step
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("step", &self.step.name())
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

/// The engine handle passed to every step.
///
/// Cloning is cheap; clones share configuration and operations.
#[derive(Clone, Default)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    config: EngineConfig,
    operations: HashMap<String, Operation>,
}

impl Engine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Free-form configuration for steps.
    pub fn static_config(&self) -> &Value {
        &self.inner.config.static_config
    }

    /// Look up an operation by id.
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.inner.operations.get(id)
    }

    /// Ids of every registered operation, sorted.
    pub fn operation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.inner.operations.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Run an operation with a fresh context.
    pub async fn run(&self, id: &str, input: Value) -> Result<Value> {
        let ctx = ExecutionContext::builder()
            .span(tracing::info_span!("operation", engine = %self.inner.config.name, operation = id))
            .build();
        self.run_with_ctx(id, &ctx, input).await
    }

    /// Run an operation with a caller-provided context.
    ///
    /// Adapters use this to attach request/response objects or a token wired
    /// to client disconnects.
    pub async fn run_with_ctx(&self, id: &str, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let operation = self
            .operation(id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        if operation.deprecated {
            tracing::warn!(operation = id, "invoking deprecated operation");
        }

        let span = ctx.log().clone();
        operation
            .step
            .run(input, ctx, self)
            .into_future()
            .instrument(span)
            .await
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("operations", &self.operation_ids())
            .finish()
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    operations: HashMap<String, Operation>,
}

impl EngineBuilder {
    /// Use `config` instead of the default configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an operation. A later registration with the same id replaces
    /// the earlier one.
    pub fn operation(mut self, operation: Operation) -> Self {
        if self.operations.contains_key(operation.id()) {
            tracing::warn!(operation = operation.id(), "replacing already registered operation");
        }
        self.operations.insert(operation.id.clone(), operation);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                operations: self.operations,
            }),
        }
    }
}
