//! Conditional step routing.

use serde_json::Value;
use std::sync::Arc;

use super::{Outcome, SharedStep, Step};
use crate::{Engine, ExecutionContext};

type Predicate = Arc<dyn Fn(&Value, &ExecutionContext) -> bool + Send + Sync>;

/// Collects the arms of a [`match_with`] expression.
///
/// Arms registered with [`on`](Self::on) are tested in registration order;
/// [`otherwise`](Self::otherwise) supplies the default and closes the
/// expression.
#[derive(Default)]
pub struct MatchBuilder {
    arms: Vec<(Predicate, SharedStep)>,
}

impl MatchBuilder {
    /// Run `step` when `predicate` holds for the running value.
    pub fn on<P, S>(mut self, predicate: P, step: S) -> Self
    where
        P: Fn(&Value, &ExecutionContext) -> bool + Send + Sync + 'static,
        S: Step + 'static,
    {
        self.arms.push((Arc::new(predicate), Arc::new(step)));
        self
    }

    /// Run `step` when no predicate matches. Required to finish the expression.
    pub fn otherwise<S: Step + 'static>(self, step: S) -> MatchArms {
        MatchArms {
            arms: self.arms,
            default: Arc::new(step),
        }
    }
}

/// A complete, immutable list of match arms plus the default.
pub struct MatchArms {
    arms: Vec<(Predicate, SharedStep)>,
    default: SharedStep,
}

/// A step that routes the running value to the first matching arm.
///
/// # Example
///
/// ```rust
/// use bauta::{match_with, Engine, ExecutionContext, Step, SyncStep};
/// use serde_json::json;
///
/// let classify = match_with(|m| {
///     m.on(|v, _| v.is_array(), SyncStep::new(|_, _, _| Ok(json!("list"))))
///         .on(|v, _| v.is_object(), SyncStep::new(|_, _, _| Ok(json!("record"))))
///         .otherwise(SyncStep::new(|_, _, _| Ok(json!("scalar"))))
/// });
///
/// let ctx = ExecutionContext::new();
/// let engine = Engine::default();
/// let out = classify.run(json!([1]), &ctx, &engine);
/// assert_eq!(out.into_ready().unwrap().unwrap(), json!("list"));
/// ```
pub struct MatchStep {
    arms: Vec<(Predicate, SharedStep)>,
    default: SharedStep,
}

/// Build a [`MatchStep`].
///
/// `build` runs exactly once, here; executions only consult the arms it
/// produced.
pub fn match_with<B>(build: B) -> MatchStep
where
    B: FnOnce(MatchBuilder) -> MatchArms,
{
    let MatchArms { arms, default } = build(MatchBuilder::default());
    MatchStep { arms, default }
}

impl MatchStep {
    /// Number of predicate arms, excluding the default.
    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    fn select(&self, input: &Value, ctx: &ExecutionContext) -> &SharedStep {
        self.arms
            .iter()
            .find(|(predicate, _)| predicate(input, ctx))
            .map_or(&self.default, |(_, step)| step)
    }
}

impl Step for MatchStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let step = self.select(&input, ctx);
        step.run(input, ctx, engine)
    }

    fn name(&self) -> &str {
        "match"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::pipe::pipe;
    use crate::step::{LambdaStep, SyncStep};
    use crate::steps;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn label(name: &'static str) -> SyncStep<impl Fn(Value, &ExecutionContext, &Engine) -> crate::Result<Value> + Send + Sync> {
        SyncStep::new(move |_: Value, _: &ExecutionContext, _: &Engine| Ok(json!(name)))
    }

    fn run(step: &MatchStep, input: Value) -> Value {
        step.run(input, &ExecutionContext::new(), &Engine::default())
            .into_ready()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn builder_runs_once_regardless_of_executions() {
        let builds = AtomicUsize::new(0);
        let m = match_with(|m| {
            builds.fetch_add(1, Ordering::SeqCst);
            m.on(|v, _| v == &json!(1), label("one")).otherwise(label("other"))
        });

        for _ in 0..5 {
            run(&m, json!(1));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_matching_arm_wins() {
        let m = match_with(|m| {
            m.on(|v, _| v.as_i64().is_some_and(|n| n > 10), label("big"))
                .on(|v, _| v.as_i64().is_some_and(|n| n > 0), label("positive"))
                .otherwise(label("other"))
        });

        assert_eq!(m.arm_count(), 2);
        assert_eq!(run(&m, json!(50)), json!("big"));
        assert_eq!(run(&m, json!(5)), json!("positive"));
        assert_eq!(run(&m, json!(-1)), json!("other"));
    }

    #[test]
    fn predicates_see_context() {
        let m = match_with(|m| {
            m.on(|_, ctx| ctx.contains_key("admin"), label("admin"))
                .otherwise(label("guest"))
        });
        let ctx = ExecutionContext::new();
        ctx.set("admin", json!(true));

        let out = m.run(json!(null), &ctx, &Engine::default());
        assert_eq!(out.into_ready().unwrap().unwrap(), json!("admin"));
    }

    #[tokio::test]
    async fn arms_can_be_async_pipelines() {
        let m = match_with(|m| {
            m.on(
                |v, _| v.is_string(),
                pipe(steps![LambdaStep::new(|v, _, _| async move {
                    Ok(json!(format!("hello {}", v.as_str().unwrap_or_default())))
                })]),
            )
            .otherwise(label("no name"))
        });

        let out = m.run(json!("tom"), &ExecutionContext::new(), &Engine::default());
        assert_eq!(out.await.unwrap(), json!("hello tom"));
    }
}
