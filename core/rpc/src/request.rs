// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{Extensions, HeaderMap};

use crate::identity::{RequestIdentity, RequestMetadata};

/// Fully qualified procedure of a unary call, `/package.Service/Method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Procedure {
    service: Arc<str>,
    method: Arc<str>,
}

impl Procedure {
    /// Parse a path. A path without a service segment is kept as the
    /// method of an unnamed service.
    pub fn new(path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        let (service, method) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));

        Procedure {
            service: Arc::from(service),
            method: Arc::from(method),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.service.is_empty() {
            write!(f, "/{}", self.method)
        } else {
            write!(f, "/{}/{}", self.service, self.method)
        }
    }
}

/// Inbound unary call as seen by the interceptor pipeline.
#[derive(Debug)]
pub struct RpcRequest<T> {
    procedure: Procedure,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    extensions: Extensions,
    message: T,
}

impl<T> RpcRequest<T> {
    pub fn new(procedure: Procedure, message: T) -> Self {
        RpcRequest {
            procedure,
            headers: HeaderMap::new(),
            remote_addr: None,
            extensions: Extensions::new(),
            message,
        }
    }

    /// Adapt a tonic request. Metadata becomes the header set.
    pub fn from_tonic(procedure: Procedure, request: tonic::Request<T>) -> Self {
        let remote_addr = request.remote_addr();
        let headers = request.metadata().clone().into_headers();

        RpcRequest {
            procedure,
            headers,
            remote_addr,
            extensions: Extensions::new(),
            message: request.into_inner(),
        }
    }

    pub fn with_headers(self, headers: HeaderMap) -> Self {
        RpcRequest { headers, ..self }
    }

    pub fn with_remote_addr(self, remote_addr: SocketAddr) -> Self {
        RpcRequest {
            remote_addr: Some(remote_addr),
            ..self
        }
    }

    pub fn procedure(&self) -> &Procedure {
        &self.procedure
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn into_message(self) -> T {
        self.message
    }

    /// Identity attached by the identity stage, `None` for anonymous callers.
    pub fn identity(&self) -> Option<&RequestIdentity> {
        self.extensions
            .get::<Arc<RequestIdentity>>()
            .map(|identity| identity.as_ref())
    }

    /// Metadata attached by the identity stage.
    pub fn metadata(&self) -> Option<&RequestMetadata> {
        self.extensions.get::<RequestMetadata>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_parts() {
        let procedure = Procedure::new("/shop.v1.Orders/Create");
        assert_eq!(procedure.service(), "shop.v1.Orders");
        assert_eq!(procedure.method(), "Create");
        assert_eq!(procedure.to_string(), "/shop.v1.Orders/Create");
    }

    #[test]
    fn test_procedure_without_service() {
        let procedure = Procedure::new("Ping");
        assert_eq!(procedure.service(), "");
        assert_eq!(procedure.method(), "Ping");
    }

    #[test]
    fn test_from_tonic() {
        let mut request = tonic::Request::new(7u32);
        request
            .metadata_mut()
            .insert("x-user-id", "u-1".parse().unwrap());

        let rpc = RpcRequest::from_tonic(Procedure::new("/a.B/C"), request);
        assert_eq!(rpc.headers().get("x-user-id").unwrap(), "u-1");
        assert_eq!(*rpc.message(), 7);
        assert!(rpc.remote_addr().is_none());
        assert!(rpc.identity().is_none());
    }
}
