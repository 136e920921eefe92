// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use http::HeaderName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::component::configuration::Configuration;
use crate::errors::ConfigError;

/// Names of the headers carrying caller identity and request metadata.
/// The same mapping is used to read inbound calls and to write outbound ones.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct HeaderNames {
    /// Correlation id of the request.
    pub request_id: String,

    /// Token presented by trusted internal callers.
    pub internal_token: String,

    /// Authenticated user id. Identity is only extracted when this is set.
    pub user_id: String,

    /// Display name of the user.
    pub user_name: String,

    /// Comma separated list of roles.
    pub user_roles: String,

    /// Client address set by the edge proxy.
    pub real_ip: String,

    /// Comma separated proxy chain, first entry is the client.
    pub forwarded_for: String,

    /// User agent of the caller.
    pub user_agent: String,

    /// Per request timeout override, in milliseconds.
    pub timeout: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        HeaderNames {
            request_id: "x-request-id".to_string(),
            internal_token: "x-internal-token".to_string(),
            user_id: "x-user-id".to_string(),
            user_name: "x-user-name".to_string(),
            user_roles: "x-user-roles".to_string(),
            real_ip: "x-real-ip".to_string(),
            forwarded_for: "x-forwarded-for".to_string(),
            user_agent: "user-agent".to_string(),
            timeout: "x-request-timeout".to_string(),
        }
    }
}

impl HeaderNames {
    /// Field name / header name pairs, in declaration order.
    pub fn entries(&self) -> [(&'static str, &str); 9] {
        [
            ("request_id", &self.request_id),
            ("internal_token", &self.internal_token),
            ("user_id", &self.user_id),
            ("user_name", &self.user_name),
            ("user_roles", &self.user_roles),
            ("real_ip", &self.real_ip),
            ("forwarded_for", &self.forwarded_for),
            ("user_agent", &self.user_agent),
            ("timeout", &self.timeout),
        ]
    }

    /// Parse one configured name into an [`HeaderName`].
    pub fn parse(field: &'static str, name: &str) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|source| ConfigError::InvalidHeaderName { field, source })
    }
}

impl Configuration for HeaderNames {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        for (field, name) in self.entries() {
            HeaderNames::parse(field, name)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_header_names() {
        let names = HeaderNames::default();
        assert_eq!(names.user_id, "x-user-id");
        assert_eq!(names.forwarded_for, "x-forwarded-for");
        assert!(names.validate().is_ok());
    }

    #[test]
    fn test_invalid_header_name() {
        let names = HeaderNames {
            user_roles: "x user roles".to_string(),
            ..Default::default()
        };

        match names.validate() {
            Err(ConfigError::InvalidHeaderName { field, .. }) => assert_eq!(field, "user_roles"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let names: HeaderNames = serde_yaml::from_str("user_id: x-account-id\n").unwrap();
        assert_eq!(names.user_id, "x-account-id");
        assert_eq!(names.request_id, "x-request-id");
    }
}
