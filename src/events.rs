//! Structured pipeline execution events for tracing and observability.
//!
//! Events are recorded into the [`ExecutionContext`](crate::ExecutionContext)
//! trace log by [`InstrumentedStep`](crate::InstrumentedStep) and by the retry
//! combinator, giving a per-request record of what ran and what failed.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Events that can be emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    /// A step has started execution.
    StepStart {
        /// Name of the step being executed.
        step_name: String,
    },
    /// A step has finished successfully.
    StepEnd {
        /// Name of the step that completed.
        step_name: String,
        /// Duration of execution in milliseconds.
        duration_ms: u128,
    },
    /// A retry attempt did not satisfy its condition.
    RetryAttempt {
        /// Zero-based attempt index.
        attempt: usize,
        /// Failure message if the attempt errored rather than returning a value.
        error: Option<String>,
    },
    /// An error occurred during step execution.
    Error {
        /// Name of the step where the error occurred.
        step_name: String,
        /// Error message describing what went wrong.
        message: String,
    },
}

/// A timestamped trace entry containing a pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u128,
    /// The pipeline event that was recorded.
    #[serde(flatten)]
    pub event: PipelineEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: PipelineEvent) -> Self {
        // A clock before the epoch is recorded as zero.
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}
