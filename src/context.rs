//! Execution context for pipeline runs.
//!
//! One [`ExecutionContext`] is created per top-level invocation and passed to
//! every step of that invocation, including the branches of `parallel` and
//! `map`. It carries the cancellation token, a scratch data bag, the logger
//! span, and opaque references to the request/response objects of whatever
//! adapter triggered the run.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::Span;

use crate::events::{PipelineEvent, TraceEntry};
use crate::token::CancelableToken;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Opaque = Arc<dyn Any + Send + Sync>;

/// Context passed to every step in a pipeline.
///
/// Cloning is cheap and every clone refers to the same context: the token,
/// data bag and trace log are shared.
///
/// # Shared data
///
/// The data bag is shared by reference across concurrent branches. Each
/// `get`/`set` is atomic on its own, but nothing coordinates a read followed
/// by a write; branches writing the same key get last-write-wins. Partition
/// keys per branch, or write shared lookups before fanning out.
///
/// # Example
///
/// ```rust
/// use bauta::ExecutionContext;
/// use serde_json::json;
///
/// let ctx = ExecutionContext::builder().id("req-1").build();
/// ctx.set("user", json!({ "id": 7 }));
///
/// let branch_view = ctx.clone();
/// assert_eq!(branch_view.get("user"), Some(json!({ "id": 7 })));
/// assert!(!branch_view.token().is_canceled());
/// ```
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: String,
    token: CancelableToken,
    data: Mutex<Map<String, Value>>,
    traces: Mutex<Vec<TraceEntry>>,
    span: Span,
    request: Option<Opaque>,
    response: Option<Opaque>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create a context with a generated id and a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a context.
    #[must_use]
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    /// The request id of this invocation.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The cancellation token shared by the whole invocation.
    pub fn token(&self) -> &CancelableToken {
        &self.inner.token
    }

    /// The logger handle for this invocation.
    pub fn log(&self) -> &Span {
        &self.inner.span
    }

    /// Returns `true` if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The triggering request, if one was attached and has type `T`.
    pub fn request<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.request.as_deref()?.downcast_ref::<T>()
    }

    /// The response object, if one was attached and has type `T`.
    pub fn response<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.response.as_deref()?.downcast_ref::<T>()
    }

    fn data(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a value from the data bag.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data().get(key).cloned()
    }

    /// Store a value in the data bag, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data().insert(key.into(), value)
    }

    /// Remove a value from the data bag.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data().remove(key)
    }

    /// Whether the data bag holds `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data().contains_key(key)
    }

    /// Run `f` with exclusive access to the data bag.
    ///
    /// The lock is held for the duration of `f`; never call back into the
    /// context's data methods from inside it.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.data())
    }

    /// Emit a structured event to the trace log.
    pub fn emit(&self, event: PipelineEvent) {
        let entry = TraceEntry::new(event);
        self.inner
            .traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Get a snapshot of the current trace log.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.inner
            .traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear all trace entries.
    pub fn clear_traces(&self) {
        self.inner
            .traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("token", &self.inner.token)
            .field("data", &*self.data())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExecutionContext`].
#[derive(Default)]
pub struct ExecutionContextBuilder {
    id: Option<String>,
    token: Option<CancelableToken>,
    span: Option<Span>,
    request: Option<Opaque>,
    response: Option<Opaque>,
    data: Map<String, Value>,
}

impl ExecutionContextBuilder {
    /// Use a caller-supplied request id instead of a generated one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use an existing token, e.g. one wired to a client disconnect.
    pub fn token(mut self, token: CancelableToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Use a caller-supplied span as the logger handle.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach the triggering request object.
    pub fn request<T: Any + Send + Sync>(mut self, request: T) -> Self {
        self.request = Some(Arc::new(request));
        self
    }

    /// Attach the response object.
    pub fn response<T: Any + Send + Sync>(mut self, response: T) -> Self {
        self.response = Some(Arc::new(response));
        self
    }

    /// Seed the data bag.
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Build the context.
    #[must_use]
    pub fn build(self) -> ExecutionContext {
        let id = self
            .id
            .unwrap_or_else(|| NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string());
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("request", req_id = %id));

        ExecutionContext {
            inner: Arc::new(ContextInner {
                id,
                token: self.token.unwrap_or_default(),
                data: Mutex::new(self.data),
                traces: Mutex::new(Vec::new()),
                span,
                request: self.request,
                response: self.response,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct FakeRequest {
        path: &'static str,
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ExecutionContext::new();
        let b = ExecutionContext::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clones_share_data_and_token() {
        let ctx = ExecutionContext::builder()
            .id("req-42")
            .data("seed", json!(1))
            .build();
        let clone = ctx.clone();

        clone.set("written", json!("by clone"));
        assert_eq!(ctx.get("written"), Some(json!("by clone")));
        assert_eq!(ctx.get("seed"), Some(json!(1)));
        assert!(ctx.ptr_eq(&clone));
        assert!(ctx.token().ptr_eq(clone.token()));

        clone.token().cancel();
        assert!(ctx.token().is_canceled());
    }

    #[test]
    fn last_write_wins() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.set("k", json!(1)), None);
        assert_eq!(ctx.set("k", json!(2)), Some(json!(1)));
        assert_eq!(ctx.get("k"), Some(json!(2)));
        assert_eq!(ctx.remove("k"), Some(json!(2)));
        assert!(!ctx.contains_key("k"));
    }

    #[test]
    fn request_downcasts_to_attached_type() {
        let ctx = ExecutionContext::builder()
            .request(FakeRequest { path: "/cats" })
            .build();

        assert_eq!(ctx.request::<FakeRequest>(), Some(&FakeRequest { path: "/cats" }));
        assert!(ctx.request::<String>().is_none());
        assert!(ctx.response::<FakeRequest>().is_none());
    }

    #[test]
    fn with_data_batches_updates() {
        let ctx = ExecutionContext::new();
        let len = ctx.with_data(|data| {
            data.insert("a".into(), json!(1));
            data.insert("b".into(), json!(2));
            data.len()
        });
        assert_eq!(len, 2);
    }

    #[test]
    fn trace_log_records_and_clears() {
        let ctx = ExecutionContext::new();
        ctx.emit(PipelineEvent::StepStart {
            step_name: "a".into(),
        });
        assert_eq!(ctx.trace_snapshot().len(), 1);
        ctx.clear_traces();
        assert!(ctx.trace_snapshot().is_empty());
    }
}
