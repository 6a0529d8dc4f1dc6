//! Tap step for side effects.

use serde_json::Value;

use super::pipe::{pipe, Pipeline};
use super::{Outcome, SharedStep, Step};
use crate::{Engine, Error, ExecutionContext};

/// A step that runs an inner pipeline for its effects and yields its own input.
///
/// The inner pipeline's result is discarded whether it settles synchronously
/// or not. A failure inside it fails the tap, unless an error handler is
/// attached with [`catch_error`](Self::catch_error): a handler that recovers
/// has its value discarded too, and one that fails makes the tap fail with
/// the handler's error.
///
/// # Example
///
/// ```rust
/// use bauta::{steps, tap, Engine, ExecutionContext, Step, SyncStep};
/// use serde_json::json;
///
/// let audit = tap(steps![SyncStep::new(|v, ctx, _| {
///     ctx.set("audited", v.clone());
///     Ok(json!("ignored"))
/// })]);
///
/// let ctx = ExecutionContext::new();
/// let out = audit.run(json!({ "name": "x" }), &ctx, &Engine::default());
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!({ "name": "x" }));
/// assert_eq!(ctx.get("audited"), Some(json!({ "name": "x" })));
/// ```
#[derive(Clone, Debug)]
pub struct TapStep {
    pipeline: Pipeline,
}

/// Build a [`TapStep`] over `steps`, composed as by [`pipe`].
pub fn tap(steps: Vec<SharedStep>) -> TapStep {
    TapStep {
        pipeline: pipe(steps),
    }
}

impl TapStep {
    /// Tap an existing pipeline.
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Install the error handler for the inner pipeline, replacing any previous one.
    pub fn catch_error<H>(self, handler: H) -> Self
    where
        H: Fn(Error, &ExecutionContext, &Engine) -> Outcome + Send + Sync + 'static,
    {
        Self {
            pipeline: self.pipeline.catch_error(handler),
        }
    }

    /// Access the inner pipeline.
    pub fn inner(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl Step for TapStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        match self.pipeline.run(input.clone(), ctx, engine) {
            Outcome::Ready(result) => Outcome::Ready(result.map(|_| input)),
            Outcome::Pending(fut) => Outcome::pending(async move {
                fut.await?;
                Ok(input)
            }),
        }
    }

    fn name(&self) -> &str {
        "tap"
    }
}
