//! Cooperative cancellation.
//!
//! A [`CancelableToken`] is an advisory flag shared by every step of a single
//! pipeline invocation. Nothing is aborted forcibly: combinators that care
//! (notably [`RetryWhen`](crate::step::retry::RetryWhen)) poll the flag at
//! their own checkpoints.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type CancelCallback = Box<dyn FnOnce() + Send>;

/// A shareable cancellation flag with registerable callbacks.
///
/// Clones share the same flag and callback list.
///
/// # Example
///
/// ```rust
/// use bauta::CancelableToken;
///
/// let token = CancelableToken::new();
/// let observer = token.clone();
/// token.on_cancel(|| println!("canceled"));
///
/// token.cancel();
/// assert!(observer.is_canceled());
/// ```
#[derive(Clone, Default)]
pub struct CancelableToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    canceled: AtomicBool,
    callbacks: Mutex<Vec<CancelCallback>>,
}

impl CancelableToken {
    /// Create a fresh, non-canceled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`cancel`](Self::cancel) has been called on this token or any clone.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Mark the token canceled and run the registered callbacks in
    /// registration order. Only the first call has any effect.
    pub fn cancel(&self) {
        let callbacks = {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.canceled.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *guard)
        };

        tracing::debug!(callbacks = callbacks.len(), "token canceled");
        for callback in callbacks {
            callback();
        }
    }

    /// Register a callback to run on cancellation.
    ///
    /// Returns `false` and drops the callback without calling it if the token
    /// is already canceled.
    pub fn on_cancel<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_canceled() {
            return false;
        }
        guard.push(Box::new(callback));
        true
    }

    /// Returns `true` if both handles refer to the same token.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CancelableToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableToken")
            .field("is_canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}
