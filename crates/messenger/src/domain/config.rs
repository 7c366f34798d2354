//! Messenger configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the default request timeout (milliseconds).
pub const ENV_REQUEST_TIMEOUT_MS: &str = "MESSENGER_REQUEST_TIMEOUT_MS";

/// Environment variable overriding the reply exchange name.
pub const ENV_REPLY_EXCHANGE: &str = "MESSENGER_REPLY_EXCHANGE";

/// Environment variable overriding the reply routing-key prefix.
pub const ENV_REPLY_PREFIX: &str = "MESSENGER_REPLY_PREFIX";

/// Messenger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Default time a request waits for its reply
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Exchange replies are published to (declared as `direct`)
    pub reply_exchange: String,
    /// Prefix of the per-instance reply routing key
    pub reply_prefix: String,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reply_exchange: "messenger.replies".to_string(),
            reply_prefix: "reply".to_string(),
        }
    }
}

impl MessengerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }

        if self.reply_exchange.trim().is_empty() {
            return Err(ConfigError::InvalidReplyRoute(
                "reply_exchange cannot be empty".into(),
            ));
        }

        if self.reply_prefix.contains(['#', '*']) {
            return Err(ConfigError::InvalidReplyRoute(
                "reply_prefix cannot contain wildcards".into(),
            ));
        }

        Ok(())
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Unparseable values are logged and ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            match raw.parse::<u64>() {
                Ok(ms) => {
                    self.request_timeout = Duration::from_millis(ms);
                    info!(timeout_ms = ms, "Loaded request timeout from environment");
                }
                Err(_) => warn!(value = %raw, "{} must be an integer", ENV_REQUEST_TIMEOUT_MS),
            }
        }

        if let Some(exchange) = lookup(ENV_REPLY_EXCHANGE) {
            self.reply_exchange = exchange;
        }

        if let Some(prefix) = lookup(ENV_REPLY_PREFIX) {
            self.reply_prefix = prefix;
        }

        self
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Invalid reply exchange or prefix
    #[error("invalid reply route: {0}")]
    InvalidReplyRoute(String),
}
