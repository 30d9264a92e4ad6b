//! Client configuration.
//!
//! Every section has defaults, so an empty document is a valid config. The
//! CLI loads it from TOML; embedders can build it in code.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    pub connectivity: ConnectivityConfig,
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
}

/// `[retry]`: backoff for transient failures of queued writes.
///
/// The n-th retry waits `min(max_delay, initial_delay * 2^(n-1))` plus a
/// random jitter below `jitter_ms`. After `max_attempts` attempts the
/// write is treated as permanently failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 10,
            max_delay_ms: 10_000,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Deterministic part of the wait before retry number `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Wait before retry number `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// `[connectivity]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// How long a request may be pending before connectivity is re-probed.
    pub recheck_deadline_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        ConnectivityConfig {
            recheck_deadline_ms: 10_000,
        }
    }
}

impl ConnectivityConfig {
    pub fn recheck_deadline(&self) -> Duration {
        Duration::from_millis(self.recheck_deadline_ms)
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Request parameters whose values never reach the logs.
    pub redacted_params: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            redacted_params: vec![
                "authToken".to_string(),
                "password".to_string(),
                "partnerUserSecret".to_string(),
            ],
        }
    }
}

/// `[transport]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// API root, e.g. `https://www.example.com`. Requests go to `{base_url}/api/{command}`.
    pub base_url: Option<String>,
    /// URL probed to decide whether the network is back.
    pub ping_url: Option<String>,
    /// Initial auth token.
    pub auth_token: Option<String>,
}

impl ClientConfig {
    /// Apply `COURIER_BASE_URL` and `COURIER_AUTH_TOKEN` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("COURIER_BASE_URL") {
            self.transport.base_url = Some(url);
        }
        if let Ok(token) = std::env::var("COURIER_AUTH_TOKEN") {
            self.transport.auth_token = Some(token);
        }
        self
    }

    /// Reject settings the queue cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.connectivity.recheck_deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "connectivity.recheck_deadline_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
