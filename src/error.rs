//! Error types for pipeline execution.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A `map` or `parallel_map` selector did not produce an array.
    #[error("Selector must return an array, but it returned a value of type {found}")]
    SelectorType {
        /// JSON type name of the value the selector produced.
        found: &'static str,
    },

    /// `retry_when` consumed every attempt without satisfying its condition.
    #[error("Max retry attempts ({attempts}) reached without satisfying the condition")]
    RetryExhausted {
        /// The attempt budget that was exhausted.
        attempts: usize,
    },

    /// The shared token was canceled while `retry_when` was looping.
    #[error("Retry canceled at attempt {attempt}")]
    RetryCanceled {
        /// Zero-based attempt index at which cancellation was observed.
        attempt: usize,
    },

    /// A cache decorator was built without a key normalizer.
    #[error("A cache key normalizer is required to build a cache step")]
    NormalizerMissing,

    /// No operation is registered under the requested id.
    #[error("Operation '{0}' not found")]
    OperationNotFound(String),

    /// The engine configuration could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred during execution.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// One failure observed by several callers awaiting the same memoized
    /// computation.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    /// A stable, machine-readable name for the error's variant.
    ///
    /// [`Error::Shared`] reports the kind of the error it wraps.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SelectorType { .. } => "selector_type",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::RetryCanceled { .. } => "retry_canceled",
            Error::NormalizerMissing => "normalizer_missing",
            Error::OperationNotFound(_) => "operation_not_found",
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::Execution(_) => "execution",
            Error::Json(_) => "json",
            Error::Message(_) => "message",
            Error::Shared(inner) => inner.kind(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_error_names_observed_type() {
        let err = Error::SelectorType { found: "number" };
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn retry_errors_report_counts() {
        assert!(Error::RetryExhausted { attempts: 3 }.to_string().contains('3'));
        assert_eq!(
            Error::RetryCanceled { attempt: 1 }.to_string(),
            "Retry canceled at attempt 1"
        );
    }

    #[test]
    fn shared_errors_report_the_wrapped_kind() {
        let err = Error::Shared(Arc::new(Error::Execution("remote".into())));
        assert_eq!(err.kind(), "execution");
        assert_eq!(err.to_string(), "Execution error: remote");
        assert_eq!(Error::SelectorType { found: "string" }.kind(), "selector_type");
    }
}
