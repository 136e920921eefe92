// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::task::{Context, Poll};

use http::{HeaderMap, HeaderName, HeaderValue, Request};
use keel_config::errors::ConfigError;
use keel_config::headers::HeaderNames;
use tower_layer::Layer;
use tower_service::Service;

use crate::identity::{IdentityHeaders, RequestIdentity};

/// Copies static headers and the caller identity into outbound requests.
///
/// The identity is read from the request extensions, either as a
/// `RequestIdentity` or an `Arc<RequestIdentity>`. Headers already present
/// on the request are left alone.
#[derive(Clone, Debug)]
pub struct PropagateHeadersLayer {
    identity: IdentityHeaders,
    static_headers: Arc<HeaderMap>,
}

impl PropagateHeadersLayer {
    pub fn new(names: &HeaderNames) -> Result<Self, ConfigError> {
        Ok(PropagateHeadersLayer {
            identity: IdentityHeaders::new(names)?,
            static_headers: Arc::new(HeaderMap::new()),
        })
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        Arc::make_mut(&mut self.static_headers).insert(name, value);
        self
    }
}

impl<S> Layer<S> for PropagateHeadersLayer {
    type Service = PropagateHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PropagateHeaders {
            inner,
            identity: self.identity.clone(),
            static_headers: self.static_headers.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PropagateHeaders<S> {
    inner: S,
    identity: IdentityHeaders,
    static_headers: Arc<HeaderMap>,
}

impl<S, B> Service<Request<B>> for PropagateHeaders<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let identity = req
            .extensions()
            .get::<Arc<RequestIdentity>>()
            .map(|identity| identity.as_ref().clone())
            .or_else(|| req.extensions().get::<RequestIdentity>().cloned());

        if let Some(identity) = identity {
            let mut outbound = HeaderMap::new();
            self.identity.inject(&identity, &mut outbound);
            merge_missing(req.headers_mut(), &outbound);
        }

        merge_missing(req.headers_mut(), &self.static_headers);

        self.inner.call(req)
    }
}

fn merge_missing(headers: &mut HeaderMap, extra: &HeaderMap) {
    for (name, value) in extra {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}
