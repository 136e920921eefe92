// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::backoff::{Strategy, doubling};
use crate::component::configuration::Configuration;
use crate::duration::{deserialize_duration, serialize_duration};
use crate::errors::ConfigError;
use crate::headers::HeaderNames;

/// Retry settings of an outbound client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,

    /// Delay before the first retry, doubled for every following one.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[schemars(with = "String")]
    pub initial_backoff: Duration,

    /// Upper bound for a single backoff delay.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[schemars(with = "String")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// The cap stays at its default unless `initial_backoff` is larger.
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_retries,
            initial_backoff,
            max_backoff: defaults.max_backoff.max(initial_backoff),
        }
    }

    /// A config that performs a single attempt.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Strategy for RetryConfig {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(doubling(self.initial_backoff, self.max_backoff).take(self.max_retries as usize))
    }
}

impl Configuration for RetryConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::InvalidValue {
                field: "max_backoff",
                reason: "must not be smaller than initial_backoff".to_string(),
            });
        }

        Ok(())
    }
}

/// Circuit breaker settings of an outbound client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Guard calls with a breaker.
    pub enabled: bool,

    /// Consecutive failed calls that open the breaker.
    pub failure_threshold: u32,

    /// Time spent open before trial calls are let through.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[schemars(with = "String")]
    pub cool_down: Duration,

    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// An enabled breaker with the given threshold and cool-down.
    pub fn enabled(failure_threshold: u32, cool_down: Duration) -> Self {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            cool_down,
            ..Default::default()
        }
    }
}

impl Configuration for CircuitBreakerConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "failure_threshold",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "half_open_max_calls",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Resilience settings of one outbound client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default, JsonSchema)]
#[serde(default)]
pub struct ClientResilienceConfig {
    /// Retry configuration.
    pub retry: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Header mapping used to propagate identity to the peer.
    pub headers: HeaderNames,
}

impl ClientResilienceConfig {
    pub fn with_retry(self, retry: RetryConfig) -> Self {
        Self { retry, ..self }
    }

    pub fn with_circuit_breaker(self, circuit_breaker: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breaker,
            ..self
        }
    }
}

impl Configuration for ClientResilienceConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        self.retry.validate()?;
        if self.circuit_breaker.enabled {
            self.circuit_breaker.validate()?;
        }
        self.headers.validate()
    }
}
