//! # bauta
//!
//! Composable request pipelines for API backends.
//!
//! This crate provides a small expression language of step combinators for
//! composing synchronous and asynchronous units of work, with defined error
//! propagation, fan-out/fan-in semantics and cooperative cancellation.
//!
//! ## Core Concepts
//!
//! - **Step**: The unit of composition, returning an [`Outcome`] that is either ready or pending
//! - **ExecutionContext**: Per-invocation state: cancellation token, scratch data, logger span
//! - **Pipeline**: Sequential composition with an attachable error handler
//! - **ParallelStep / ParallelAllSettledStep**: Fan one input out to several steps
//! - **MapStep / ParallelMapStep**: Apply a step to every element of a selected array
//! - **MatchStep**: Multi-way branching on predicates
//! - **TapStep**: Side effects that leave the running value untouched
//! - **RetryWhen**: Re-run a step until a condition holds
//! - **CacheStep**: Memoize a step by a normalized key
//! - **Engine**: Configuration plus named operations, the handle every step receives
//!
//! ## Example
//!
//! ```rust
//! use bauta::{parallel_map, pipe, steps, tap, Engine, ExecutionContext, Step, SyncStep};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let pipeline = pipe(steps![
//!     SyncStep::new(|_, _, _| Ok(json!([{ "id": 1 }, { "id": 2 }]))),
//!     tap(steps![SyncStep::new(|cats, ctx, _| {
//!         ctx.set("count", json!(cats.as_array().map(Vec::len)));
//!         Ok(cats)
//!     })]),
//!     parallel_map(
//!         |cats, _| cats,
//!         SyncStep::new(|mut cat, _, _| {
//!             cat["tag"] = json!("t");
//!             Ok(cat)
//!         }),
//!     ),
//! ]);
//!
//! let ctx = ExecutionContext::new();
//! let out = pipeline.run(json!(null), &ctx, &Engine::default()).await.unwrap();
//!
//! assert_eq!(out, json!([{ "id": 1, "tag": "t" }, { "id": 2, "tag": "t" }]));
//! assert_eq!(ctx.get("count"), Some(json!(2)));
//! # });
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod instrumented;
pub mod step;
pub mod token;

pub use config::{EngineConfig, RetryOptions};
pub use context::{ExecutionContext, ExecutionContextBuilder};
pub use engine::{Engine, EngineBuilder, Operation};
pub use error::{Error, Result};
pub use events::{PipelineEvent, TraceEntry};
pub use instrumented::InstrumentedStep;
pub use token::CancelableToken;

// Re-export step types
pub use step::{
    AsyncStep, AsyncStepAdapter, BoxFuture, FnStep, LambdaStep, Outcome, SharedStep, Step,
    StepExt, SyncStep,
};
pub use step::branch::{match_with, MatchArms, MatchBuilder, MatchStep};
pub use step::cache::{CacheStep, CacheStepBuilder};
pub use step::map::{map, MapStep};
pub use step::parallel::{
    parallel, parallel_all_settled, parallel_map, ParallelAllSettledStep, ParallelMapStep,
    ParallelStep, Settlement,
};
pub use step::pipe::{pipe, ErrorHandler, Pipeline};
pub use step::retry::{retry_when, RetryWhen};
pub use step::tap::{tap, TapStep};
