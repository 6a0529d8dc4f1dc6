//! Engine configuration.
//!
//! Configuration is plain serde data so hosts can load it from whatever
//! source they already use; [`EngineConfig::from_json_str`] covers the
//! common case.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Configuration shared by every operation of an [`Engine`](crate::Engine).
///
/// # Example
///
/// ```rust
/// use bauta::EngineConfig;
///
/// let config = EngineConfig::from_json_str(
///     r#"{ "name": "cats-api", "retry": { "max_retry_attempts": 5 } }"#,
/// ).unwrap();
///
/// assert_eq!(config.name, "cats-api");
/// assert_eq!(config.retry.max_retry_attempts, 5);
/// assert_eq!(config.retry.scaling_duration.as_millis(), 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Human-readable engine name, used in log spans.
    pub name: String,
    /// Free-form configuration made available to steps via the engine handle.
    pub static_config: Value,
    /// Defaults for `retry_when` steps built without explicit options.
    pub retry: RetryOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "bauta".to_string(),
            static_config: Value::Object(Default::default()),
            retry: RetryOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retry_attempts == 0 {
            return Err(Error::Config(
                "retry.max_retry_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for the retry combinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum number of attempts before giving up.
    pub max_retry_attempts: usize,
    /// Fixed pause between attempts, (de)serialized as milliseconds.
    #[serde(with = "duration_ms")]
    pub scaling_duration: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            scaling_duration: Duration::from_millis(10),
        }
    }
}

impl RetryOptions {
    /// Set the attempt budget.
    pub fn with_max_retry_attempts(mut self, attempts: usize) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the pause between attempts.
    pub fn with_scaling_duration(mut self, duration: Duration) -> Self {
        self.scaling_duration = duration;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.name, "bauta");
        assert_eq!(config.retry, RetryOptions::default());
        assert_eq!(config.static_config, json!({}));
    }

    #[test]
    fn scaling_duration_is_milliseconds() {
        let config = EngineConfig::from_value(json!({
            "retry": { "scaling_duration": 250 },
            "static_config": { "upstream": "http://cats" }
        }))
        .unwrap();

        assert_eq!(config.retry.scaling_duration, Duration::from_millis(250));
        assert_eq!(config.retry.max_retry_attempts, 3);
        assert_eq!(config.static_config["upstream"], "http://cats");

        let back = serde_json::to_value(&config.retry).unwrap();
        assert_eq!(back["scaling_duration"], 250);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"retry":{"max_retry_attempts":0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = EngineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
