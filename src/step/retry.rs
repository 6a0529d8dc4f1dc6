//! Retry a step until a condition holds.

use serde_json::Value;
use std::sync::Arc;

use super::{Outcome, SharedStep, Step};
use crate::config::RetryOptions;
use crate::events::PipelineEvent;
use crate::{Engine, Error, ExecutionContext};

type Condition = Arc<dyn Fn(&Value, usize) -> bool + Send + Sync>;
type ErrorFactory = Arc<dyn Fn(usize) -> Error + Send + Sync>;

/// A step that re-runs an inner step until `condition(result, attempt)` holds.
///
/// Each attempt first checks the context's cancellation token; a canceled
/// token stops the loop with [`Error::RetryCanceled`]. An attempt that fails
/// is logged and counts as unsatisfied. Between attempts the step sleeps for
/// the configured `scaling_duration`. When every attempt is used up the step
/// fails with the error from [`with_error`](Self::with_error), or
/// [`Error::RetryExhausted`].
///
/// Options default to the engine's [`EngineConfig::retry`](crate::EngineConfig::retry)
/// unless set with [`with_options`](Self::with_options). Attempt indices are
/// zero-based. The step always settles asynchronously.
///
/// # Example
///
/// ```rust
/// use bauta::{retry_when, Engine, ExecutionContext, RetryOptions, Step, SyncStep};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let poll = retry_when(
///     SyncStep::new(|_, ctx, _| {
///         let n = ctx.get("polls").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
///         ctx.set("polls", json!(n));
///         Ok(json!({ "ready": n == 2 }))
///     }),
///     |result, _attempt| result["ready"] == json!(true),
/// )
/// .with_options(RetryOptions::default().with_scaling_duration(Duration::from_millis(1)));
///
/// let out = poll.run(json!(null), &ExecutionContext::new(), &Engine::default()).await.unwrap();
/// assert_eq!(out, json!({ "ready": true }));
/// # });
/// ```
pub struct RetryWhen {
    step: SharedStep,
    condition: Condition,
    options: Option<RetryOptions>,
    error: Option<ErrorFactory>,
}

/// Build a [`RetryWhen`] step.
pub fn retry_when<S, C>(step: S, condition: C) -> RetryWhen
where
    S: Step + 'static,
    C: Fn(&Value, usize) -> bool + Send + Sync + 'static,
{
    RetryWhen {
        step: Arc::new(step),
        condition: Arc::new(condition),
        options: None,
        error: None,
    }
}

impl RetryWhen {
    /// Use explicit options instead of the engine defaults.
    pub fn with_options(mut self, options: RetryOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Error to fail with once attempts are exhausted; receives the attempt budget.
    pub fn with_error<F>(mut self, error: F) -> Self
    where
        F: Fn(usize) -> Error + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(error));
        self
    }
}

impl Step for RetryWhen {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let options = self
            .options
            .clone()
            .unwrap_or_else(|| engine.config().retry.clone());
        let step = Arc::clone(&self.step);
        let condition = Arc::clone(&self.condition);
        let error = self.error.clone();
        let ctx = ctx.clone();
        let engine = engine.clone();

        Outcome::pending(async move {
            for attempt in 0..options.max_retry_attempts {
                if ctx.token().is_canceled() {
                    tracing::debug!(req_id = ctx.id(), attempt, "retry canceled");
                    return Err(Error::RetryCanceled { attempt });
                }

                let failure = match step.run(input.clone(), &ctx, &engine).await {
                    Ok(result) if condition(&result, attempt) => return Ok(result),
                    Ok(_) => None,
                    Err(err) => {
                        tracing::warn!(req_id = ctx.id(), attempt, error = %err, "retry attempt failed");
                        Some(err.to_string())
                    }
                };
                ctx.emit(PipelineEvent::RetryAttempt {
                    attempt,
                    error: failure,
                });

                if attempt + 1 < options.max_retry_attempts {
                    tokio::time::sleep(options.scaling_duration).await;
                }
            }

            let attempts = options.max_retry_attempts;
            Err(match error {
                Some(make_error) => make_error(attempts),
                None => Error::RetryExhausted { attempts },
            })
        })
    }

    fn name(&self) -> &str {
        "retry_when"
    }
}
