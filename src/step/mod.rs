//! Core step trait and fundamental step types.
//!
//! This module defines the [`Step`] trait (the unit of composition), the
//! [`Outcome`] it returns, closure adapters for building steps inline, and
//! the combinators that compose steps into pipelines.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::{Engine, ExecutionContext, Result};

pub mod branch;
pub mod cache;
pub mod map;
pub mod outcome;
pub mod parallel;
pub mod pipe;
pub mod retry;
pub mod tap;

pub use outcome::{BoxFuture, Outcome};

/// A type-erased, shareable step.
pub type SharedStep = Arc<dyn Step>;

/// The fundamental trait for composable pipeline steps.
///
/// A step receives the previous step's output, the invocation's
/// [`ExecutionContext`] and the [`Engine`] handle. It may settle immediately
/// ([`Outcome::Ready`]) or hand back a pending computation
/// ([`Outcome::Pending`]); combinators treat both uniformly.
///
/// # Example
///
/// ```rust
/// use bauta::{Engine, ExecutionContext, Outcome, Step};
/// use serde_json::{json, Value};
///
/// struct Double;
///
/// impl Step for Double {
///     fn run(&self, input: Value, _ctx: &ExecutionContext, _engine: &Engine) -> Outcome {
///         Outcome::ok(json!(input.as_i64().unwrap_or_default() * 2))
///     }
/// }
///
/// let out = Double.run(json!(21), &ExecutionContext::new(), &Engine::default());
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!(42));
/// ```
pub trait Step: Send + Sync {
    /// Execute this step with the previous value, context and engine handle.
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome;

    /// Returns a human-readable name for this step. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<S: Step + ?Sized> Step for Arc<S> {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        (**self).run(input, ctx, engine)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<S: Step + ?Sized> Step for Box<S> {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        (**self).run(input, ctx, engine)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A synchronous step built from a closure.
///
/// # Example
///
/// ```rust
/// use bauta::SyncStep;
/// use serde_json::json;
///
/// let tag = SyncStep::new(|mut item, _ctx, _engine| {
///     item["tag"] = json!("t");
///     Ok(item)
/// });
/// ```
pub struct SyncStep<F> {
    f: F,
}

impl<F> SyncStep<F>
where
    F: Fn(Value, &ExecutionContext, &Engine) -> Result<Value> + Send + Sync + 'static,
{
    /// Create a new `SyncStep` from the given closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Step for SyncStep<F>
where
    F: Fn(Value, &ExecutionContext, &Engine) -> Result<Value> + Send + Sync + 'static,
{
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        Outcome::Ready((self.f)(input, ctx, engine))
    }
}

/// An asynchronous step built from a closure returning a future.
///
/// The closure receives owned clones of the context and engine handle so the
/// future can be `'static`.
///
/// # Example
///
/// ```rust
/// use bauta::{Engine, ExecutionContext, LambdaStep, Step};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let fetch = LambdaStep::new(|id, _ctx, _engine| async move {
///     Ok(json!({ "id": id, "name": "Garfield" }))
/// });
///
/// let out = fetch.run(json!(1), &ExecutionContext::new(), &Engine::default()).await.unwrap();
/// assert_eq!(out["name"], "Garfield");
/// # });
/// ```
pub struct LambdaStep<F> {
    /// The underlying closure.
    pub f: F,
}

impl<F, Fut> LambdaStep<F>
where
    F: Fn(Value, ExecutionContext, Engine) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Create a new `LambdaStep` from the given closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Step for LambdaStep<F>
where
    F: Fn(Value, ExecutionContext, Engine) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        Outcome::pending((self.f)(input, ctx.clone(), engine.clone()))
    }
}

/// A step built from a closure that returns an [`Outcome`] directly.
///
/// Useful when a step decides per call whether it needs to go asynchronous,
/// e.g. answering from memory when it can.
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(Value, &ExecutionContext, &Engine) -> Outcome + Send + Sync + 'static,
{
    /// Create a new `FnStep` from the given closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Step for FnStep<F>
where
    F: Fn(Value, &ExecutionContext, &Engine) -> Outcome + Send + Sync + 'static,
{
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        (self.f)(input, ctx, engine)
    }
}

/// An asynchronous unit of work written as an `async fn`.
///
/// Datasource-style steps (remote calls, database lookups) usually implement
/// this trait and are wrapped with [`AsyncStepAdapter`] to join a pipeline.
#[async_trait]
pub trait AsyncStep: Send + Sync + 'static {
    /// Execute the step.
    async fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Result<Value>;
}

/// Adapts an [`AsyncStep`] into a regular [`Step`].
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use bauta::{AsyncStep, AsyncStepAdapter, Engine, ExecutionContext, Result, Step};
/// use serde_json::{json, Value};
///
/// struct CatsDatasource;
///
/// #[async_trait]
/// impl AsyncStep for CatsDatasource {
///     async fn run(&self, _input: Value, _ctx: &ExecutionContext, _engine: &Engine) -> Result<Value> {
///         Ok(json!([{ "name": "Tom" }]))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let step = AsyncStepAdapter::new(CatsDatasource);
/// let cats = step.run(Value::Null, &ExecutionContext::new(), &Engine::default()).await.unwrap();
/// assert_eq!(cats[0]["name"], "Tom");
/// # });
/// ```
pub struct AsyncStepAdapter<S> {
    step: Arc<S>,
}

impl<S: AsyncStep> AsyncStepAdapter<S> {
    /// Wrap an async step.
    pub fn new(step: S) -> Self {
        Self {
            step: Arc::new(step),
        }
    }

    /// Access the inner step.
    pub fn inner(&self) -> &S {
        &self.step
    }
}

impl<S: AsyncStep> Step for AsyncStepAdapter<S> {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let step = Arc::clone(&self.step);
        let ctx = ctx.clone();
        let engine = engine.clone();
        Outcome::pending(async move { step.run(input, &ctx, &engine).await })
    }

    fn name(&self) -> &str {
        std::any::type_name::<S>()
    }
}

/// Extension trait providing fluent composition methods for all [`Step`] implementors.
///
/// # Methods
///
/// - [`StepExt::then`]: Chain two steps sequentially
/// - [`StepExt::instrument`]: Record start/end/error events for this step
/// - [`StepExt::shared`]: Erase the concrete type behind an `Arc<dyn Step>`
pub trait StepExt: Step + Sized + 'static {
    /// Chain this step with another, feeding this step's output into `next`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bauta::{Engine, ExecutionContext, Step, StepExt, SyncStep};
    /// use serde_json::json;
    ///
    /// let pipeline = SyncStep::new(|x, _, _| Ok(json!(x.as_i64().unwrap_or(0) + 1)))
    ///     .then(SyncStep::new(|x, _, _| Ok(json!(x.as_i64().unwrap_or(0) * 3))));
    ///
    /// let out = pipeline.run(json!(1), &ExecutionContext::new(), &Engine::default());
    /// assert_eq!(out.into_ready().unwrap().unwrap(), json!(6));
    /// ```
    fn then<S: Step + 'static>(self, next: S) -> pipe::Pipeline {
        pipe::Pipeline::new().then(self).then(next)
    }

    /// Wrap this step with event recording and `tracing` logs.
    fn instrument(self, name: impl Into<String>) -> crate::InstrumentedStep<Self> {
        crate::InstrumentedStep::new(self, name)
    }

    /// Erase the concrete step type, returning a shareable trait object.
    fn shared(self) -> SharedStep {
        Arc::new(self)
    }
}

impl<T: Step + Sized + 'static> StepExt for T {}

/// Collect heterogeneous steps into a `Vec<SharedStep>`.
///
/// ```rust
/// use bauta::{steps, pipe, SyncStep};
///
/// let pipeline = pipe(steps![
///     SyncStep::new(|v, _, _| Ok(v)),
///     SyncStep::new(|v, _, _| Ok(v)),
/// ]);
/// assert_eq!(pipeline.len(), 2);
/// ```
#[macro_export]
macro_rules! steps {
    () => {
        ::std::vec::Vec::<$crate::SharedStep>::new()
    };
    ($($step:expr),+ $(,)?) => {
        ::std::vec![$(::std::sync::Arc::new($step) as $crate::SharedStep),+]
    };
}

/// The JSON type name of a value, as reported in selector type errors.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Run a selector and require it to produce an array.
pub(crate) fn select_array<F>(selector: &F, input: Value, ctx: &ExecutionContext) -> Result<Vec<Value>>
where
    F: Fn(Value, &ExecutionContext) -> Value + ?Sized,
{
    match selector(input, ctx) {
        Value::Array(items) => Ok(items),
        other => Err(crate::Error::SelectorType {
            found: json_type_name(&other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl AsyncStep for Echo {
        async fn run(&self, input: Value, ctx: &ExecutionContext, _engine: &Engine) -> Result<Value> {
            tokio::task::yield_now().await;
            Ok(json!({ "echo": input, "req": ctx.id() }))
        }
    }

    #[test]
    fn sync_step_settles_immediately() {
        let step = SyncStep::new(|v, _, _| Ok(json!([v])));
        let out = step.run(json!(1), &ExecutionContext::new(), &Engine::default());
        assert_eq!(out.into_ready().unwrap().unwrap(), json!([1]));
    }

    #[tokio::test]
    async fn lambda_step_is_pending() {
        let step = LambdaStep::new(|v, ctx, _| async move {
            ctx.set("seen", v.clone());
            Ok(v)
        });
        let ctx = ExecutionContext::new();
        let out = step.run(json!("x"), &ctx, &Engine::default());
        assert!(out.is_pending());
        assert_eq!(out.await.unwrap(), json!("x"));
        assert_eq!(ctx.get("seen"), Some(json!("x")));
    }

    #[tokio::test]
    async fn async_step_adapter_threads_context() {
        let ctx = ExecutionContext::builder().id("req-9").build();
        let out = AsyncStepAdapter::new(Echo)
            .run(json!(3), &ctx, &Engine::default())
            .await
            .unwrap();
        assert_eq!(out, json!({ "echo": 3, "req": "req-9" }));
    }

    #[test]
    fn shared_steps_forward_calls() {
        let step = SyncStep::new(|_, _, _| Ok(json!("shared"))).shared();
        let again = Arc::clone(&step);
        let out = again.run(Value::Null, &ExecutionContext::new(), &Engine::default());
        assert_eq!(out.into_ready().unwrap().unwrap(), json!("shared"));
    }

    #[test]
    fn json_type_names() {
        assert_eq!(json_type_name(&json!(1)), "number");
        assert_eq!(json_type_name(&json!("a")), "string");
        assert_eq!(json_type_name(&json!({})), "object");
        assert_eq!(json_type_name(&Value::Null), "null");
        assert_eq!(json_type_name(&json!(true)), "boolean");
    }
}
