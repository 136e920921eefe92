// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::component::configuration::Configuration;
use crate::duration::{deserialize_duration, serialize_duration};
use crate::errors::ConfigError;
use crate::headers::HeaderNames;

/// Governance settings applied to every inbound call of a service.
/// Loaded once at startup and never reloaded while serving.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, JsonSchema)]
pub struct ServerGovernanceConfig {
    /// Name of the service, used as the `service` label of metrics.
    pub service_name: String,

    /// Header mapping for identity extraction.
    #[serde(default)]
    pub headers: HeaderNames,

    /// Deadline applied to every call. A request header may shorten it.
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[schemars(with = "String")]
    pub default_timeout: Duration,

    /// Calls slower than this are logged as slow.
    #[serde(
        default = "default_slow_threshold",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[schemars(with = "String")]
    pub slow_threshold: Duration,

    /// Dump request messages at debug level.
    #[serde(default)]
    pub log_request_payload: bool,

    /// Dump response messages at debug level.
    #[serde(default)]
    pub log_response_payload: bool,

    /// Record per call metrics when a meter is available.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_timeout() -> Duration {
    Duration::from_millis(30000)
}

fn default_slow_threshold() -> Duration {
    Duration::from_secs(1)
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerGovernanceConfig {
    fn default() -> Self {
        ServerGovernanceConfig {
            service_name: String::new(),
            headers: HeaderNames::default(),
            default_timeout: default_timeout(),
            slow_threshold: default_slow_threshold(),
            log_request_payload: false,
            log_response_payload: false,
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerGovernanceConfig {
    /// Creates a configuration for the given service with all other
    /// fields set to default.
    pub fn with_service_name(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_default_timeout(self, default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            ..self
        }
    }

    pub fn with_slow_threshold(self, slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            ..self
        }
    }

    pub fn with_headers(self, headers: HeaderNames) -> Self {
        Self { headers, ..self }
    }

    pub fn with_payload_logging(self, request: bool, response: bool) -> Self {
        Self {
            log_request_payload: request,
            log_response_payload: response,
            ..self
        }
    }

    pub fn with_metrics_enabled(self, metrics_enabled: bool) -> Self {
        Self {
            metrics_enabled,
            ..self
        }
    }
}

impl std::fmt::Display for ServerGovernanceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ServerGovernanceConfig {{ service_name: {}, default_timeout: {:?}, slow_threshold: {:?}, log_request_payload: {}, log_response_payload: {}, metrics_enabled: {} }}",
            self.service_name,
            self.default_timeout,
            self.slow_threshold,
            self.log_request_payload,
            self.log_response_payload,
            self.metrics_enabled
        )
    }
}

impl Configuration for ServerGovernanceConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }

        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("default_timeout"));
        }

        self.headers.validate()
    }
}
