//! Instrumented step wrapper for automatic tracing.

use serde_json::Value;
use std::time::Instant;

use crate::step::{Outcome, Step};
use crate::{Engine, ExecutionContext, PipelineEvent, Result};

/// Wraps any step with automatic event emission and `tracing` records.
///
/// For each execution, `InstrumentedStep` emits:
/// - A [`PipelineEvent::StepStart`] before the inner step runs
/// - A [`PipelineEvent::StepEnd`] with elapsed milliseconds on success
/// - A [`PipelineEvent::Error`] on failure
///
/// The inner step's synchronous or pending shape is preserved.
///
/// # Example
///
/// ```rust
/// use bauta::{Engine, ExecutionContext, InstrumentedStep, Step, SyncStep};
/// use serde_json::json;
///
/// let step = SyncStep::new(|x, _, _| Ok(json!(x.as_i64().unwrap_or(0) + 1)));
/// let instrumented = InstrumentedStep::new(step, "increment");
///
/// let ctx = ExecutionContext::new();
/// let out = instrumented.run(json!(5), &ctx, &Engine::default());
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!(6));
///
/// let traces = ctx.trace_snapshot();
/// assert_eq!(traces.len(), 2); // StepStart + StepEnd
/// ```
pub struct InstrumentedStep<S> {
    inner: S,
    name: String,
}

impl<S: Step> InstrumentedStep<S> {
    /// Wrap `inner` with instrumentation, labelling it `name`.
    pub fn new(inner: S, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }

    /// Access the inner step.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn finish(ctx: &ExecutionContext, name: &str, start: Instant, result: &Result<Value>) {
    match result {
        Ok(_) => {
            let elapsed = start.elapsed();
            let duration_ms = elapsed.as_millis();
            tracing::debug!(req_id = ctx.id(), step = name, ?elapsed, "step finished");
            ctx.emit(PipelineEvent::StepEnd {
                step_name: name.to_string(),
                duration_ms,
            });
        }
        Err(e) => {
            tracing::warn!(req_id = ctx.id(), step = name, error = %e, "step failed");
            ctx.emit(PipelineEvent::Error {
                step_name: name.to_string(),
                message: e.to_string(),
            });
        }
    }
}

impl<S: Step> Step for InstrumentedStep<S> {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        tracing::debug!(req_id = ctx.id(), step = %self.name, "step started");
        ctx.emit(PipelineEvent::StepStart {
            step_name: self.name.clone(),
        });

        let start = Instant::now();
        match self.inner.run(input, ctx, engine) {
            Outcome::Ready(result) => {
                finish(ctx, &self.name, start, &result);
                Outcome::Ready(result)
            }
            Outcome::Pending(fut) => {
                let ctx = ctx.clone();
                let name = self.name.clone();
                Outcome::pending(async move {
                    let result = fut.await;
                    finish(&ctx, &name, start, &result);
                    result
                })
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
