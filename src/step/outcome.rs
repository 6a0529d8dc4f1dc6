//! The result of invoking a step: either settled now or pending.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use futures::future::{self, BoxFuture as FuturesBoxFuture};
use serde_json::Value;

use crate::{Error, Result};

/// A boxed, `'static` future resolving to a step result.
pub type BoxFuture<T = Value> = FuturesBoxFuture<'static, Result<T>>;

/// What a [`Step`](super::Step) returns.
///
/// Synchronous steps return [`Outcome::Ready`] and never touch the executor;
/// asynchronous steps return [`Outcome::Pending`]. Combinators inspect the
/// variant once at each composition boundary, so a pipeline made only of
/// synchronous steps settles without allocating a future.
///
/// `Outcome` implements [`IntoFuture`], so either shape can be awaited.
///
/// # Example
///
/// ```rust
/// use bauta::Outcome;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let ready = Outcome::ok(json!(1));
/// assert!(ready.is_ready());
///
/// let pending = Outcome::pending(async { Ok(json!(2)) });
/// assert_eq!(pending.await.unwrap(), json!(2));
/// # });
/// ```
#[must_use = "an Outcome may hold a pending computation that does nothing unless awaited"]
pub enum Outcome<T = Value> {
    /// The step settled synchronously.
    Ready(Result<T>),
    /// The step will settle when the future resolves.
    Pending(BoxFuture<T>),
}

impl<T: Send + 'static> Outcome<T> {
    /// A synchronous success.
    pub fn ok(value: T) -> Self {
        Outcome::Ready(Ok(value))
    }

    /// A synchronous failure.
    pub fn err(error: impl Into<Error>) -> Self {
        Outcome::Ready(Err(error.into()))
    }

    /// Wrap a future as a pending outcome.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Outcome::Pending(Box::pin(future))
    }

    /// Whether the outcome settled synchronously.
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    /// Whether the outcome is still pending.
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }

    /// The settled result, or `None` if the outcome is pending.
    pub fn into_ready(self) -> Option<Result<T>> {
        match self {
            Outcome::Ready(result) => Some(result),
            Outcome::Pending(_) => None,
        }
    }

    /// Transform the success value, keeping the outcome's shape.
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Outcome::Ready(result) => Outcome::Ready(result.map(f)),
            Outcome::Pending(fut) => Outcome::pending(async move { fut.await.map(f) }),
        }
    }
}

impl<T: Send + 'static> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        Outcome::Ready(result)
    }
}

impl<T: Send + 'static> IntoFuture for Outcome<T> {
    type Output = Result<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Outcome::Ready(result) => Box::pin(future::ready(result)),
            Outcome::Pending(fut) => fut,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_keeps_ready_shape() {
        let out = Outcome::ok(json!(2)).map(|v| json!(v.as_i64().unwrap_or(0) * 10));
        assert_eq!(out.into_ready().unwrap().unwrap(), json!(20));
    }

    #[tokio::test]
    async fn map_keeps_pending_shape() {
        let out = Outcome::pending(async { Ok(json!("a")) }).map(|v| json!([v]));
        assert!(out.is_pending());
        assert_eq!(out.await.unwrap(), json!(["a"]));
    }

    #[tokio::test]
    async fn ready_error_awaits_to_error() {
        let out: Outcome = Outcome::err("nope");
        assert!(matches!(out.await, Err(Error::Message(m)) if m == "nope"));
    }
}
