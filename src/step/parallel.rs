//! Concurrent fan-out / fan-in combinators.
//!
//! Branches run as interleaved futures on the caller's task; nothing is
//! spawned. Results are always positional, whatever order branches finish in.

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::Arc;

use super::{select_array, BoxFuture, Outcome, SharedStep, Step};
use crate::{Engine, Error, ExecutionContext, Result};

/// Extracts the array a mapping combinator iterates over.
pub type Selector = Arc<dyn Fn(Value, &ExecutionContext) -> Value + Send + Sync>;

/// Outcome record produced by [`parallel_all_settled`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Settlement {
    /// The branch resolved.
    Fulfilled {
        /// The branch result.
        value: Value,
    },
    /// The branch rejected.
    Rejected {
        /// The branch error message.
        reason: String,
        /// The error variant, as reported by [`Error::kind`].
        kind: String,
    },
}

impl Settlement {
    fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Settlement::Fulfilled { value },
            Err(err) => Settlement::Rejected {
                reason: err.to_string(),
                kind: err.kind().to_string(),
            },
        }
    }

    fn into_value(self) -> Value {
        match self {
            Settlement::Fulfilled { value } => {
                serde_json::json!({ "status": "fulfilled", "value": value })
            }
            Settlement::Rejected { reason, kind } => {
                serde_json::json!({ "status": "rejected", "reason": reason, "kind": kind })
            }
        }
    }
}

/// Invoke every branch, stopping at the first synchronous failure.
///
/// Returns `Ok(settled)` if every branch settled synchronously, otherwise the
/// futures to join (already-settled branches become ready futures).
fn dispatch<'a, I>(
    branches: I,
    ctx: &ExecutionContext,
    engine: &Engine,
) -> Result<std::result::Result<Vec<Value>, Vec<BoxFuture>>>
where
    I: IntoIterator<Item = (&'a SharedStep, Value)>,
{
    let mut outcomes = Vec::new();
    let mut all_ready = true;
    for (step, input) in branches {
        match step.run(input, ctx, engine) {
            Outcome::Ready(Err(err)) => return Err(err),
            outcome => {
                all_ready &= outcome.is_ready();
                outcomes.push(outcome);
            }
        }
    }

    if all_ready {
        let values = outcomes
            .into_iter()
            .filter_map(Outcome::into_ready)
            .collect::<Result<Vec<_>>>()?;
        Ok(Ok(values))
    } else {
        Ok(Err(outcomes.into_iter().map(|o| o.into_future()).collect()))
    }
}

fn fail_fast(dispatched: Result<std::result::Result<Vec<Value>, Vec<BoxFuture>>>) -> Outcome {
    match dispatched {
        Err(err) => Outcome::Ready(Err(err)),
        Ok(Ok(values)) => Outcome::ok(Value::Array(values)),
        Ok(Err(futures)) => {
            Outcome::pending(async move { try_join_all(futures).await.map(Value::Array) })
        }
    }
}

/// Runs every branch with the same input and collects the results in order.
///
/// Fails with the first failure observed. A branch that fails while being
/// dispatched fails the combinator before later branches are invoked; among
/// pending branches the first rejection wins and the remaining futures are
/// dropped.
///
/// # Example
///
/// ```rust
/// use bauta::{parallel, steps, Engine, ExecutionContext, LambdaStep, Step};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let both = parallel(steps![
///     LambdaStep::new(|id, _, _| async move { Ok(json!({ "cat": id })) }),
///     LambdaStep::new(|id, _, _| async move { Ok(json!({ "dog": id })) }),
/// ]);
///
/// let out = both.run(json!(1), &ExecutionContext::new(), &Engine::default()).await.unwrap();
/// assert_eq!(out, json!([{ "cat": 1 }, { "dog": 1 }]));
/// # });
/// ```
pub struct ParallelStep {
    branches: Vec<SharedStep>,
}

/// Build a [`ParallelStep`].
pub fn parallel(branches: Vec<SharedStep>) -> ParallelStep {
    ParallelStep { branches }
}

impl Step for ParallelStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let branches = self.branches.iter().map(|step| (step, input.clone()));
        fail_fast(dispatch(branches, ctx, engine))
    }

    fn name(&self) -> &str {
        "parallel"
    }
}

/// Runs every branch with the same input and reports each settlement.
///
/// The result is an array of `{"status": "fulfilled", "value": ..}` or
/// `{"status": "rejected", "reason": "..", "kind": ".."}` records in branch
/// order, where `kind` is the failing [`Error::kind`]. A branch
/// rejecting does not fail the combinator. A branch that fails synchronously
/// while being dispatched is not a settlement: it fails the whole combinator
/// immediately.
pub struct ParallelAllSettledStep {
    branches: Vec<SharedStep>,
}

/// Build a [`ParallelAllSettledStep`].
pub fn parallel_all_settled(branches: Vec<SharedStep>) -> ParallelAllSettledStep {
    ParallelAllSettledStep { branches }
}

impl Step for ParallelAllSettledStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let branches = self.branches.iter().map(|step| (step, input.clone()));
        match dispatch(branches, ctx, engine) {
            Err(err) => Outcome::Ready(Err(err)),
            Ok(Ok(values)) => Outcome::ok(Value::Array(
                values
                    .into_iter()
                    .map(|value| Settlement::Fulfilled { value }.into_value())
                    .collect(),
            )),
            Ok(Err(futures)) => Outcome::pending(async move {
                let settled = join_all(futures)
                    .await
                    .into_iter()
                    .map(|result| Settlement::from_result(result).into_value())
                    .collect();
                Ok(Value::Array(settled))
            }),
        }
    }

    fn name(&self) -> &str {
        "parallel_all_settled"
    }
}

/// Applies a step to every element of a selected array concurrently.
///
/// The selector must yield an array; anything else fails with
/// [`Error::SelectorType`]. Results keep element order; the first rejection
/// fails the combinator.
///
/// # Example
///
/// ```rust
/// use bauta::{parallel_map, Engine, ExecutionContext, LambdaStep, Step};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let names = parallel_map(
///     |v, _| v["cats"].clone(),
///     LambdaStep::new(|cat, _, _| async move { Ok(cat["name"].clone()) }),
/// );
///
/// let input = json!({ "cats": [{ "name": "Tom" }, { "name": "Felix" }] });
/// let out = names.run(input, &ExecutionContext::new(), &Engine::default()).await.unwrap();
/// assert_eq!(out, json!(["Tom", "Felix"]));
/// # });
/// ```
pub struct ParallelMapStep {
    selector: Selector,
    step: SharedStep,
}

/// Build a [`ParallelMapStep`].
pub fn parallel_map<F, S>(selector: F, step: S) -> ParallelMapStep
where
    F: Fn(Value, &ExecutionContext) -> Value + Send + Sync + 'static,
    S: Step + 'static,
{
    ParallelMapStep {
        selector: Arc::new(selector),
        step: Arc::new(step),
    }
}

impl ParallelMapStep {
    /// Access the per-element step.
    pub fn inner(&self) -> &SharedStep {
        &self.step
    }
}

impl Step for ParallelMapStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let items = match select_array(&*self.selector, input, ctx) {
            Ok(items) => items,
            Err(err) => return Outcome::Ready(Err(err)),
        };
        let branches = items.into_iter().map(|item| (&self.step, item));
        fail_fast(dispatch(branches, ctx, engine))
    }

    fn name(&self) -> &str {
        "parallel_map"
    }
}

impl From<Settlement> for Value {
    fn from(settlement: Settlement) -> Self {
        settlement.into_value()
    }
}

impl TryFrom<Value> for Settlement {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
