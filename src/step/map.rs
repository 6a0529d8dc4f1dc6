//! Sequential mapping over a selected array.

use serde_json::Value;
use std::sync::Arc;

use super::parallel::Selector;
use super::{select_array, Outcome, SharedStep, Step};
use crate::{Engine, ExecutionContext};

/// A step that applies an inner step to each element of a selected array, in order.
///
/// Elements are processed one at a time with the same context. While the
/// inner step settles synchronously the whole map stays synchronous; once an
/// element goes pending, later elements are invoked only after it resolves.
/// Use [`parallel_map`](super::parallel::parallel_map) when elements are
/// independent and throughput matters more than ordering of side effects.
///
/// # Example
///
/// ```rust
/// use bauta::{map, Engine, ExecutionContext, Step, SyncStep};
/// use serde_json::json;
///
/// let lengths = map(
///     |v, _| v,
///     SyncStep::new(|s, _, _| Ok(json!(s.as_str().map(str::len).unwrap_or(0)))),
/// );
///
/// let out = lengths.run(json!(["a", "bcd"]), &ExecutionContext::new(), &Engine::default());
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!([1, 3]));
/// ```
pub struct MapStep {
    selector: Selector,
    step: SharedStep,
}

/// Build a [`MapStep`].
pub fn map<F, S>(selector: F, step: S) -> MapStep
where
    F: Fn(Value, &ExecutionContext) -> Value + Send + Sync + 'static,
    S: Step + 'static,
{
    MapStep {
        selector: Arc::new(selector),
        step: Arc::new(step),
    }
}

impl MapStep {
    /// Access the per-element step.
    pub fn inner(&self) -> &SharedStep {
        &self.step
    }
}

impl Step for MapStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let items = match select_array(&*self.selector, input, ctx) {
            Ok(items) => items,
            Err(err) => return Outcome::Ready(Err(err)),
        };

        let mut results = Vec::with_capacity(items.len());
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            match self.step.run(item, ctx, engine) {
                Outcome::Ready(Ok(value)) => results.push(value),
                Outcome::Ready(Err(err)) => return Outcome::Ready(Err(err)),
                Outcome::Pending(fut) => {
                    let step = Arc::clone(&self.step);
                    let ctx = ctx.clone();
                    let engine = engine.clone();
                    return Outcome::pending(async move {
                        results.push(fut.await?);
                        for item in items {
                            results.push(step.run(item, &ctx, &engine).await?);
                        }
                        Ok(Value::Array(results))
                    });
                }
            }
        }
        Outcome::ok(Value::Array(results))
    }

    fn name(&self) -> &str {
        "map"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FnStep, LambdaStep, SyncStep};
    use crate::Error;
    use serde_json::json;
    use std::sync::Mutex;

    fn run(step: &MapStep, input: Value) -> Outcome {
        step.run(input, &ExecutionContext::new(), &Engine::default())
    }

    #[test]
    fn non_array_selection_names_type() {
        let m = map(|_, _| json!(1), SyncStep::new(|v, _, _| Ok(v)));
        let err = run(&m, json!(null)).into_ready().unwrap().unwrap_err();
        assert!(err.to_string().contains("number"));

        let m = map(|_, _| json!({ "not": "array" }), SyncStep::new(|v, _, _| Ok(v)));
        let err = run(&m, json!(null)).into_ready().unwrap().unwrap_err();
        assert!(matches!(err, Error::SelectorType { found: "object" }));
    }

    #[test]
    fn sync_map_is_ready_and_ordered() {
        let m = map(
            |v, _| v["items"].clone(),
            SyncStep::new(|v, _, _| Ok(json!(v.as_i64().unwrap_or(0) + 1))),
        );
        let out = run(&m, json!({ "items": [1, 2, 3] }));
        assert!(out.is_ready());
        assert_eq!(out.into_ready().unwrap().unwrap(), json!([2, 3, 4]));
    }

    #[test]
    fn empty_selection_yields_empty_array() {
        let m = map(|v, _| v, SyncStep::new(|_, _, _| Err(Error::from("never"))));
        assert_eq!(run(&m, json!([])).into_ready().unwrap().unwrap(), json!([]));
    }

    #[tokio::test]
    async fn pending_elements_are_sequenced() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let start_log = std::sync::Arc::clone(&log);

        let m = map(
            |v, _| v,
            FnStep::new(move |item, _, _| {
                start_log.lock().unwrap().push(format!("start {item}"));
                let end_log = std::sync::Arc::clone(&start_log);
                Outcome::pending(async move {
                    tokio::task::yield_now().await;
                    end_log.lock().unwrap().push(format!("end {item}"));
                    Ok(item)
                })
            }),
        );

        let out = run(&m, json!([1, 2]));
        assert!(out.is_pending());
        assert_eq!(out.await.unwrap(), json!([1, 2]));
        assert_eq!(*log.lock().unwrap(), vec!["start 1", "end 1", "start 2", "end 2"]);
    }

    #[tokio::test]
    async fn first_failure_stops_iteration() {
        let m = map(
            |v, _| v,
            LambdaStep::new(|v, _, _| async move {
                if v == json!(2) {
                    Err(Error::from("two"))
                } else {
                    Ok(v)
                }
            }),
        );
        let err = run(&m, json!([1, 2, 3])).await.unwrap_err();
        assert_eq!(err.to_string(), "two");
    }
}
