// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors for Config.
/// Raised once, when a configuration is loaded or validated, never on the
/// request path.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing service name")]
    MissingServiceName,
    #[error("invalid header name for {field}: {source}")]
    InvalidHeaderName {
        field: &'static str,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
