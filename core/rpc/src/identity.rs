// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Caller identity and request metadata carried through a call.

use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue};
use keel_config::errors::ConfigError;
use keel_config::headers::HeaderNames;
use tracing::debug;

/// Metadata every inbound call has, authenticated or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub request_id: Option<String>,
    /// Resolved client address, empty when unknown.
    pub remote_ip: String,
    pub user_agent: Option<String>,
    pub internal_token: Option<String>,
}

/// Identity of an authenticated caller. Built once per call and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    user_id: String,
    display_name: Option<String>,
    roles: Vec<String>,
    metadata: RequestMetadata,
}

impl RequestIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        RequestIdentity {
            user_id: user_id.into(),
            display_name: None,
            roles: Vec::new(),
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_display_name(self, display_name: impl Into<String>) -> Self {
        RequestIdentity {
            display_name: Some(display_name.into()),
            ..self
        }
    }

    pub fn with_roles<I, R>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        RequestIdentity {
            roles: roles.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_metadata(self, metadata: RequestMetadata) -> Self {
        RequestIdentity { metadata, ..self }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub fn request_id(&self) -> Option<&str> {
        self.metadata.request_id.as_deref()
    }

    pub fn remote_ip(&self) -> &str {
        &self.metadata.remote_ip
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.metadata.user_agent.as_deref()
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.metadata.internal_token.as_deref()
    }
}

/// Parsed header mapping. Built from [`HeaderNames`] once, at construction.
#[derive(Debug, Clone)]
pub struct IdentityHeaders {
    request_id: HeaderName,
    internal_token: HeaderName,
    user_id: HeaderName,
    user_name: HeaderName,
    user_roles: HeaderName,
    real_ip: HeaderName,
    forwarded_for: HeaderName,
    user_agent: HeaderName,
    timeout: HeaderName,
}

impl Default for IdentityHeaders {
    fn default() -> Self {
        IdentityHeaders {
            request_id: HeaderName::from_static("x-request-id"),
            internal_token: HeaderName::from_static("x-internal-token"),
            user_id: HeaderName::from_static("x-user-id"),
            user_name: HeaderName::from_static("x-user-name"),
            user_roles: HeaderName::from_static("x-user-roles"),
            real_ip: HeaderName::from_static("x-real-ip"),
            forwarded_for: HeaderName::from_static("x-forwarded-for"),
            user_agent: http::header::USER_AGENT,
            timeout: HeaderName::from_static("x-request-timeout"),
        }
    }
}

impl IdentityHeaders {
    pub fn new(names: &HeaderNames) -> Result<Self, ConfigError> {
        Ok(IdentityHeaders {
            request_id: HeaderNames::parse("request_id", &names.request_id)?,
            internal_token: HeaderNames::parse("internal_token", &names.internal_token)?,
            user_id: HeaderNames::parse("user_id", &names.user_id)?,
            user_name: HeaderNames::parse("user_name", &names.user_name)?,
            user_roles: HeaderNames::parse("user_roles", &names.user_roles)?,
            real_ip: HeaderNames::parse("real_ip", &names.real_ip)?,
            forwarded_for: HeaderNames::parse("forwarded_for", &names.forwarded_for)?,
            user_agent: HeaderNames::parse("user_agent", &names.user_agent)?,
            timeout: HeaderNames::parse("timeout", &names.timeout)?,
        })
    }

    /// Name of the per request timeout override header.
    pub fn timeout(&self) -> &HeaderName {
        &self.timeout
    }

    /// Metadata of the call. Never fails, missing headers are `None`.
    pub fn extract_metadata(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> RequestMetadata {
        RequestMetadata {
            request_id: header_str(headers, &self.request_id).map(str::to_string),
            remote_ip: self.remote_ip(headers, peer),
            user_agent: header_str(headers, &self.user_agent).map(str::to_string),
            internal_token: header_str(headers, &self.internal_token).map(str::to_string),
        }
    }

    /// Identity of the caller, `None` when the user id header is absent or
    /// empty. An unauthenticated caller is not an error here.
    pub fn extract(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Option<RequestIdentity> {
        self.identity(headers, || self.extract_metadata(headers, peer))
    }

    /// Like [`extract`](Self::extract), with metadata the caller already
    /// extracted. `metadata` only runs when a user id is present.
    pub fn identity(
        &self,
        headers: &HeaderMap,
        metadata: impl FnOnce() -> RequestMetadata,
    ) -> Option<RequestIdentity> {
        let user_id = header_str(headers, &self.user_id)?;

        let roles = header_str(headers, &self.user_roles)
            .map(parse_roles)
            .unwrap_or_default();

        Some(RequestIdentity {
            user_id: user_id.to_string(),
            display_name: header_str(headers, &self.user_name).map(str::to_string),
            roles,
            metadata: metadata(),
        })
    }

    /// Real IP header, then the first forwarded-for entry, then the
    /// transport peer, else empty.
    pub fn remote_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if let Some(ip) = header_str(headers, &self.real_ip) {
            return ip.to_string();
        }

        if let Some(first) = header_str(headers, &self.forwarded_for)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return first.to_string();
        }

        peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
    }

    /// Write the caller identity to outbound headers so the peer sees the
    /// same user. Values that are not valid header values are skipped.
    pub fn inject(&self, identity: &RequestIdentity, headers: &mut HeaderMap) {
        insert(headers, &self.user_id, identity.user_id());
        if let Some(name) = identity.display_name() {
            insert(headers, &self.user_name, name);
        }
        if !identity.roles().is_empty() {
            insert(headers, &self.user_roles, &identity.roles().join(","));
        }
        if let Some(request_id) = identity.request_id() {
            insert(headers, &self.request_id, request_id);
        }
        if let Some(token) = identity.internal_token() {
            insert(headers, &self.internal_token, token);
        }
    }
}

/// Comma separated roles, trimmed, empty entries dropped, order kept.
pub fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn insert(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name.clone(), value);
        }
        Err(_) => debug!(header = %name, "skipping header with invalid value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extract_identity() {
        let map = headers(&[
            ("x-user-id", "u-1"),
            ("x-user-name", "Ada"),
            ("x-user-roles", "admin, ops"),
            ("x-request-id", "req-7"),
            ("user-agent", "curl/8.0"),
        ]);

        let identity = IdentityHeaders::default().extract(&map, None).unwrap();
        assert_eq!(identity.user_id(), "u-1");
        assert_eq!(identity.display_name(), Some("Ada"));
        assert_eq!(identity.roles(), &["admin".to_string(), "ops".to_string()]);
        assert!(identity.has_role("ops"));
        assert_eq!(identity.request_id(), Some("req-7"));
        assert_eq!(identity.user_agent(), Some("curl/8.0"));
        assert_eq!(identity.internal_token(), None);
    }

    #[test]
    fn test_no_user_id_means_no_identity() {
        let map = headers(&[("x-user-roles", "admin"), ("x-request-id", "req-7")]);
        assert!(IdentityHeaders::default().extract(&map, None).is_none());

        let map = headers(&[("x-user-id", "  ")]);
        assert!(IdentityHeaders::default().extract(&map, None).is_none());
    }

    #[test]
    fn test_roles_absent_is_empty() {
        let map = headers(&[("x-user-id", "u-2")]);
        let identity = IdentityHeaders::default().extract(&map, None).unwrap();
        assert!(identity.roles().is_empty());
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!(parse_roles(" a ,b,, c "), vec!["a", "b", "c"]);
        assert!(parse_roles("").is_empty());
    }

    #[test]
    fn test_remote_ip_resolution_order() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let ids = IdentityHeaders::default();

        let map = headers(&[
            ("x-real-ip", "1.1.1.1"),
            ("x-forwarded-for", "2.2.2.2, 3.3.3.3"),
        ]);
        assert_eq!(ids.remote_ip(&map, Some(peer)), "1.1.1.1");

        let map = headers(&[("x-forwarded-for", " 2.2.2.2 , 3.3.3.3")]);
        assert_eq!(ids.remote_ip(&map, Some(peer)), "2.2.2.2");

        assert_eq!(ids.remote_ip(&HeaderMap::new(), Some(peer)), "10.0.0.9");
        assert_eq!(ids.remote_ip(&HeaderMap::new(), None), "");
    }

    #[test]
    fn test_custom_header_names() {
        let names = HeaderNames {
            user_id: "x-account".to_string(),
            ..Default::default()
        };
        let ids = IdentityHeaders::new(&names).unwrap();

        let map = headers(&[("x-account", "acc-1"), ("x-user-id", "ignored")]);
        assert_eq!(ids.extract(&map, None).unwrap().user_id(), "acc-1");
    }

    #[test]
    fn test_invalid_header_name() {
        let names = HeaderNames {
            timeout: "bad header".to_string(),
            ..Default::default()
        };
        assert!(IdentityHeaders::new(&names).is_err());
    }

    #[test]
    fn test_inject_round_trip() {
        let identity = RequestIdentity::new("u-1")
            .with_display_name("Ada")
            .with_roles(["admin", "ops"])
            .with_metadata(RequestMetadata {
                request_id: Some("req-1".to_string()),
                internal_token: Some("secret".to_string()),
                ..Default::default()
            });

        let ids = IdentityHeaders::default();
        let mut map = HeaderMap::new();
        ids.inject(&identity, &mut map);

        assert_eq!(map.get("x-user-roles").unwrap(), "admin,ops");
        assert_eq!(map.get("x-internal-token").unwrap(), "secret");

        let back = ids.extract(&map, None).unwrap();
        assert_eq!(back.user_id(), "u-1");
        assert_eq!(back.roles(), identity.roles());
        assert_eq!(back.request_id(), Some("req-1"));
    }

    #[test]
    fn test_identity_reuses_extracted_metadata() {
        let ids = IdentityHeaders::default();
        let mut map = HeaderMap::new();
        map.insert("x-request-id", HeaderValue::from_static("req-9"));

        // anonymous: metadata is never built
        assert!(ids.identity(&map, || unreachable!()).is_none());

        map.insert("x-user-id", HeaderValue::from_static("u-3"));
        let metadata = ids.extract_metadata(&map, None);
        let identity = ids.identity(&map, || metadata.clone()).unwrap();
        assert_eq!(identity.metadata(), &metadata);
        assert_eq!(identity.request_id(), Some("req-9"));
    }
}
