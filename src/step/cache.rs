//! Memoizing decorator.

use futures::future::{BoxFuture as FuturesBoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Outcome, SharedStep, Step};
use crate::{Engine, Error, ExecutionContext, Result};

type Normalizer = Arc<dyn Fn(&Value, &ExecutionContext) -> String + Send + Sync>;

type InFlight = Shared<FuturesBoxFuture<'static, std::result::Result<Value, Arc<Error>>>>;

const DEFAULT_MAX_SIZE: usize = 500;

#[derive(Clone)]
enum Slot {
    Ready(Value),
    InFlight { id: u64, result: InFlight },
}

#[derive(Default)]
struct Entries {
    values: HashMap<String, Slot>,
    order: VecDeque<String>,
    next_id: u64,
}

impl Entries {
    /// Look up `key`, marking it most recently used.
    fn lookup(&mut self, key: &str) -> Option<Slot> {
        let slot = self.values.get(key).cloned()?;
        self.touch(key);
        Some(slot)
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn insert(&mut self, key: String, slot: Slot, max_size: usize) {
        if self.values.insert(key.clone(), slot).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }
        while self.values.len() > max_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.values.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.order.retain(|k| k != key);
    }

    /// Replace the in-flight computation `id` with its result, or drop it if
    /// it failed. Entries that were evicted or replaced meanwhile are left alone.
    fn settle(&mut self, key: &str, id: u64, result: &std::result::Result<Value, Arc<Error>>) {
        match self.values.get(key) {
            Some(Slot::InFlight { id: current, .. }) if *current == id => {}
            _ => return,
        }
        match result {
            Ok(value) => {
                self.values.insert(key.to_string(), Slot::Ready(value.clone()));
            }
            Err(_) => self.remove(key),
        }
    }

    fn clear(&mut self) {
        self.values.clear();
        self.order.clear();
    }
}

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand a shared failure back to one waiter, unwrapped when no other waiter holds it.
fn unshare(err: Arc<Error>) -> Error {
    Arc::try_unwrap(err).unwrap_or_else(Error::Shared)
}

/// A step that memoizes the results of an inner step.
///
/// The cache key comes from a caller-supplied normalizer over the running
/// value and context. Successful results are stored. A pending computation is
/// stored while it runs, so concurrent calls with the same key share one
/// execution of the inner step; if it fails the entry is dropped, so failures
/// are never cached. When a computation fails for several waiters at once,
/// each one receives [`Error::Shared`] around the same error.
///
/// At most `max_size` entries are kept, in-flight ones included; the least
/// recently used entry is evicted first.
///
/// Clones share the same cache.
///
/// # Example
///
/// ```rust
/// use bauta::{CacheStep, Engine, ExecutionContext, Step, SyncStep};
/// use serde_json::json;
///
/// let cached = CacheStep::builder(SyncStep::new(|v, _, _| Ok(json!({ "cat": v }))))
///     .normalizer(|v, _ctx| v.to_string())
///     .max_size(100)
///     .build()
///     .unwrap();
///
/// let ctx = ExecutionContext::new();
/// let engine = Engine::default();
/// let _ = cached.run(json!(1), &ctx, &engine);
/// assert_eq!(cached.len(), 1);
/// ```
#[derive(Clone)]
pub struct CacheStep {
    step: SharedStep,
    normalizer: Normalizer,
    max_size: usize,
    entries: Arc<Mutex<Entries>>,
}

impl CacheStep {
    /// Start building a cache around `step`.
    pub fn builder<S: Step + 'static>(step: S) -> CacheStepBuilder {
        CacheStepBuilder {
            step: Arc::new(step),
            normalizer: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Number of cached entries, in-flight ones included.
    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        lock(&self.entries)
    }
}

impl Step for CacheStep {
    fn run(&self, input: Value, ctx: &ExecutionContext, engine: &Engine) -> Outcome {
        let key = (self.normalizer)(&input, ctx);
        let cached = self.lock().lookup(&key);
        match cached {
            Some(Slot::Ready(hit)) => {
                tracing::trace!(req_id = ctx.id(), key = %key, "cache hit");
                return Outcome::ok(hit);
            }
            Some(Slot::InFlight { result, .. }) => {
                tracing::trace!(req_id = ctx.id(), key = %key, "joining in-flight computation");
                return Outcome::pending(async move { result.await.map_err(unshare) });
            }
            None => {}
        }

        let max_size = self.max_size;
        match self.step.run(input, ctx, engine) {
            Outcome::Ready(Ok(value)) => {
                self.lock().insert(key, Slot::Ready(value.clone()), max_size);
                Outcome::ok(value)
            }
            Outcome::Ready(Err(err)) => Outcome::Ready(Err(err)),
            Outcome::Pending(fut) => {
                let entries = Arc::clone(&self.entries);
                let mut guard = self.lock();
                let id = guard.next_id;
                guard.next_id += 1;

                let settle_key = key.clone();
                let result = async move {
                    let result = fut.await.map_err(Arc::new);
                    lock(&entries).settle(&settle_key, id, &result);
                    result
                }
                .boxed()
                .shared();

                guard.insert(
                    key,
                    Slot::InFlight {
                        id,
                        result: result.clone(),
                    },
                    max_size,
                );
                drop(guard);

                Outcome::pending(async move { result.await.map_err(unshare) })
            }
        }
    }

    fn name(&self) -> &str {
        "cache"
    }
}

/// Builder for [`CacheStep`].
pub struct CacheStepBuilder {
    step: SharedStep,
    normalizer: Option<Normalizer>,
    max_size: usize,
}

impl CacheStepBuilder {
    /// Set the function mapping the running value and context to a cache key.
    pub fn normalizer<F>(mut self, normalizer: F) -> Self
    where
        F: Fn(&Value, &ExecutionContext) -> String + Send + Sync + 'static,
    {
        self.normalizer = Some(Arc::new(normalizer));
        self
    }

    /// Set the maximum number of entries (default 500).
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Build the cache step.
    ///
    /// Fails with [`Error::NormalizerMissing`] if no normalizer was set.
    pub fn build(self) -> Result<CacheStep> {
        let normalizer = self.normalizer.ok_or(Error::NormalizerMissing)?;
        Ok(CacheStep {
            step: self.step,
            normalizer,
            max_size: self.max_size,
            entries: Arc::new(Mutex::new(Entries::default())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::parallel::{parallel, parallel_all_settled};
    use crate::step::{LambdaStep, SyncStep};
    use crate::steps;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(calls: &Arc<AtomicUsize>) -> LambdaStep<impl Fn(Value, ExecutionContext, Engine) -> futures::future::Ready<Result<Value>> + Send + Sync> {
        let calls = Arc::clone(calls);
        LambdaStep::new(move |v: Value, _: ExecutionContext, _: Engine| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(json!({ "id": v })))
        })
    }

    fn by_id() -> impl Fn(&Value, &ExecutionContext) -> String + Send + Sync + 'static {
        |v: &Value, _: &ExecutionContext| v.to_string()
    }

    #[test]
    fn missing_normalizer_fails_at_build() {
        let err = CacheStep::builder(SyncStep::new(|v, _, _| Ok(v))).build().err().unwrap();
        assert!(matches!(err, Error::NormalizerMissing));
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CacheStep::builder(counted(&calls)).normalizer(by_id()).build().unwrap();
        let ctx = ExecutionContext::new();
        let engine = Engine::default();

        let first = cache.run(json!(1), &ctx, &engine);
        assert!(first.is_pending());
        assert_eq!(first.await.unwrap(), json!({ "id": 1 }));

        let second = cache.run(json!(1), &ctx, &engine);
        assert!(second.is_ready());
        assert_eq!(second.await.unwrap(), json!({ "id": 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CacheStep::builder(SyncStep::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::from("down"))
        }))
        .normalizer(by_id())
        .build()
        .unwrap();

        let ctx = ExecutionContext::new();
        let engine = Engine::default();
        for _ in 0..2 {
            assert!(cache.run(json!(1), &ctx, &engine).into_ready().unwrap().is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let cache = CacheStep::builder(SyncStep::new(|v, _, _| Ok(v)))
            .normalizer(by_id())
            .max_size(2)
            .build()
            .unwrap();
        let ctx = ExecutionContext::new();
        let engine = Engine::default();

        for i in 0..3 {
            let _ = cache.run(json!(i), &ctx, &engine).into_ready();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.lock().values.contains_key("0"));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CacheStep::builder(LambdaStep::new(move |v, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Ok(json!({ "id": v }))
            }
        }))
        .normalizer(by_id())
        .build()
        .unwrap();

        let fan_out = parallel(steps![cache.clone(), cache.clone(), cache.clone()]);
        let out = fan_out.run(json!(1), &ExecutionContext::new(), &Engine::default()).await.unwrap();

        assert_eq!(out, json!([{ "id": 1 }, { "id": 1 }, { "id": 1 }]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        let again = cache.run(json!(1), &ExecutionContext::new(), &Engine::default());
        assert!(again.is_ready());
    }

    #[tokio::test]
    async fn failed_in_flight_computation_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = CacheStep::builder(LambdaStep::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Err::<Value, _>(Error::Execution("remote".into()))
            }
        }))
        .normalizer(by_id())
        .build()
        .unwrap();
        let ctx = ExecutionContext::new();
        let engine = Engine::default();

        let err = cache.run(json!(1), &ctx, &engine).await.unwrap_err();
        assert!(matches!(err, Error::Execution(ref m) if m == "remote"));
        assert!(cache.is_empty());

        let fan_out = parallel_all_settled(steps![cache.clone(), cache.clone()]);
        let out = fan_out.run(json!(1), &ctx, &engine).await.unwrap();
        assert_eq!(out[0]["kind"], "execution");
        assert_eq!(out[1]["reason"], "Execution error: remote");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn hits_refresh_recency() {
        let cache = CacheStep::builder(SyncStep::new(|v, _, _| Ok(v)))
            .normalizer(by_id())
            .max_size(2)
            .build()
            .unwrap();
        let ctx = ExecutionContext::new();
        let engine = Engine::default();

        for i in [0, 1, 0, 2] {
            let _ = cache.run(json!(i), &ctx, &engine).into_ready();
        }
        let entries = cache.lock();
        assert!(entries.values.contains_key("0"));
        assert!(!entries.values.contains_key("1"));
        assert!(entries.values.contains_key("2"));
    }

    #[test]
    fn normalizer_can_use_context() {
        let cache = CacheStep::builder(SyncStep::new(|_, ctx, _| Ok(json!(ctx.id()))))
            .normalizer(|_, ctx| ctx.id().to_string())
            .build()
            .unwrap();
        let engine = Engine::default();
        let a = ExecutionContext::builder().id("a").build();
        let b = ExecutionContext::builder().id("b").build();

        let _ = cache.run(json!(null), &a, &engine).into_ready();
        let out = cache.run(json!(null), &b, &engine).into_ready().unwrap().unwrap();
        assert_eq!(out, json!("b"));
        assert_eq!(cache.len(), 2);
    }
}
