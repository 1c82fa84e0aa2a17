//! Stream and provider configuration.
//!
//! Every field carries a serde default, so an absent file or an entirely
//! unconfigured environment produces a valid configuration. Values are
//! layered by [`StreamConfig::load`]:
//!
//! 1. built-in defaults
//! 2. an optional configuration file (any format supported by `config`)
//! 3. environment variables prefixed `QS__` with `__` as separator,
//!    e.g. `QS__MAX_SEND_BATCH=5` or `QS__SQS__REGION=eu-west-1`

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix used by [`StreamConfig::load`]
pub const ENV_PREFIX: &str = "QS";

/// Tuning of the stream adapter
///
/// Defaults match the limits of AWS SQS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum byte size of one batch payload accepted by the service
    pub max_message_bytes: usize,
    /// Maximum number of entries in one send batch
    pub max_send_batch: usize,
    /// Maximum number of messages requested per receive
    pub max_receive_batch: u32,
    /// Seconds a received message stays hidden from other consumers
    pub visibility_timeout_seconds: u32,
    /// Upper bound between write admission retries
    pub write_retry_interval_ms: u64,
    /// Upper bound between checks of the in-flight acknowledgment count while draining
    pub drain_poll_interval_ms: u64,
    /// Settings of the HTTP SQS provider
    pub sqs: SqsConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 262_144,
            max_send_batch: 10,
            max_receive_batch: 10,
            visibility_timeout_seconds: 30,
            write_retry_interval_ms: 500,
            drain_poll_interval_ms: 50,
            sqs: SqsConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let loaded = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let config: Self = loaded
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check values against the limits the queue service enforces
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_send_batch == 0 || self.max_send_batch > 10 {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "max_send_batch must be between 1 and 10, got {}",
                    self.max_send_batch
                ),
            });
        }

        if self.max_receive_batch == 0 || self.max_receive_batch > 10 {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "max_receive_batch must be between 1 and 10, got {}",
                    self.max_receive_batch
                ),
            });
        }

        if self.max_message_bytes < 2 {
            return Err(ConfigurationError::Invalid {
                message: "max_message_bytes must leave room for at least one byte".to_string(),
            });
        }

        if self.visibility_timeout_seconds > 43_200 {
            return Err(ConfigurationError::Invalid {
                message: "visibility_timeout_seconds cannot exceed 12 hours".to_string(),
            });
        }

        if self.sqs.wait_time_seconds > 20 {
            return Err(ConfigurationError::Invalid {
                message: "sqs.wait_time_seconds cannot exceed 20".to_string(),
            });
        }

        if self.write_retry_interval_ms == 0 || self.drain_poll_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll intervals must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn write_retry_interval(&self) -> Duration {
        Duration::from_millis(self.write_retry_interval_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }
}

/// AWS SQS provider configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    pub region: String,
    /// Endpoint override, e.g. a LocalStack URL; derived from the region when absent
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub request_timeout_seconds: u64,
    /// Long-poll wait on receive; zero returns immediately when the queue is empty
    pub wait_time_seconds: u32,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            request_timeout_seconds: 30,
            wait_time_seconds: 0,
        }
    }
}

impl SqsConfig {
    /// Endpoint used for requests
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", self.region))
    }

    /// Static credentials from the configuration or the standard AWS variables
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => {
                let key = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
                let secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
                Some((key, secret))
            }
        }
    }
}

impl std::fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("wait_time_seconds", &self.wait_time_seconds)
            .finish()
    }
}
