//! Sequential step composition.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::{Outcome, SharedStep, Step};
use crate::{Engine, Error, ExecutionContext};

/// An error handler attached to a pipeline with [`Pipeline::catch_error`].
pub type ErrorHandler = Arc<dyn Fn(Error, &ExecutionContext, &Engine) -> Outcome + Send + Sync>;

/// An ordered sequence of steps composed into a single step.
///
/// Each step's output feeds the next step's input. The pipeline stays
/// synchronous for as long as its steps do; once a step returns
/// [`Outcome::Pending`], the remaining steps are sequenced after it and the
/// pipeline returns a pending outcome for that invocation.
///
/// A failing step stops the sequence. The error reaches the handler attached
/// with [`catch_error`](Self::catch_error), if any, and otherwise propagates
/// unchanged to the caller. Nested pipelines handle their own errors first;
/// an inner handler that fails passes its new error outward, where it is
/// handled at most once more.
///
/// Cloning a pipeline is cheap and shares the steps.
///
/// # Example
///
/// ```rust
/// use bauta::{pipe, steps, Engine, Error, ExecutionContext, Outcome, Step, SyncStep};
/// use serde_json::json;
///
/// let pipeline = pipe(steps![
///     SyncStep::new(|_, _, _| Err(Error::from("upstream down"))),
///     SyncStep::new(|v, _, _| Ok(v)),
/// ])
/// .catch_error(|err, _ctx, _engine| Outcome::ok(json!({ "fallback": err.to_string() })));
///
/// let out = pipeline.run(json!(null), &ExecutionContext::new(), &Engine::default());
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!({ "fallback": "upstream down" }));
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Arc<Vec<SharedStep>>,
    handler: Option<ErrorHandler>,
}

/// Compose `steps` into a [`Pipeline`].
///
/// An empty list yields a pipeline that returns its input unchanged.
pub fn pipe(steps: Vec<SharedStep>) -> Pipeline {
    Pipeline {
        steps: Arc::new(steps),
        handler: None,
    }
}

impl Pipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn then<S: Step + 'static>(mut self, step: S) -> Self {
        Arc::make_mut(&mut self.steps).push(Arc::new(step));
        self
    }

    /// Install the error handler for this pipeline, replacing any previous one.
    ///
    /// The handler receives the error that stopped the pipeline. Returning a
    /// value recovers (it becomes the pipeline's result); returning an error
    /// replaces the original error.
    pub fn catch_error<H>(mut self, handler: H) -> Self
    where
        H: Fn(Error, &ExecutionContext, &Engine) -> Outcome + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Whether an error handler is installed.
    pub fn has_error_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Number of steps in the pipeline.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn run_steps(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let mut value = input;
        for (index, step) in self.steps.iter().enumerate() {
            match step.run(value, ctx, engine) {
                Outcome::Ready(Ok(next)) => value = next,
                Outcome::Ready(Err(err)) => return Outcome::Ready(Err(err)),
                Outcome::Pending(fut) => {
                    let steps = Arc::clone(&self.steps);
                    let ctx = ctx.clone();
                    let engine = engine.clone();
                    return Outcome::pending(async move {
                        let mut value = fut.await?;
                        for step in &steps[index + 1..] {
                            value = step.run(value, &ctx, &engine).await?;
                        }
                        Ok(value)
                    });
                }
            }
        }
        Outcome::ok(value)
    }
}

impl Step for Pipeline {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let outcome = self.run_steps(input, ctx, engine);
        let Some(handler) = self.handler.clone() else {
            return outcome;
        };

        match outcome {
            Outcome::Ready(Err(err)) => handler(err, ctx, engine),
            Outcome::Pending(fut) => {
                let ctx = ctx.clone();
                let engine = engine.clone();
                Outcome::pending(async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) => handler(err, &ctx, &engine).await,
                    }
                })
            }
            ready => ready,
        }
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("has_error_handler", &self.handler.is_some())
            .finish()
    }
}
