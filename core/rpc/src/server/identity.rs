// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::identity::IdentityHeaders;
use crate::request::RpcRequest;

#[derive(Debug, Clone)]
pub struct IdentityLayer {
    headers: Arc<IdentityHeaders>,
}

impl IdentityLayer {
    pub fn new(headers: IdentityHeaders) -> Self {
        IdentityLayer {
            headers: Arc::new(headers),
        }
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = InjectIdentity<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectIdentity {
            inner,
            headers: self.headers.clone(),
        }
    }
}

/// Attaches [`RequestMetadata`](crate::identity::RequestMetadata) and, for
/// authenticated callers, an `Arc<RequestIdentity>` to the request.
#[derive(Debug, Clone)]
pub struct InjectIdentity<S> {
    inner: S,
    headers: Arc<IdentityHeaders>,
}

impl<S, T> Service<RpcRequest<T>> for InjectIdentity<S>
where
    S: Service<RpcRequest<T>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RpcRequest<T>) -> Self::Future {
        let peer = req.remote_addr();
        let metadata = self.headers.extract_metadata(req.headers(), peer);
        let identity = self.headers.identity(req.headers(), || metadata.clone());

        req.extensions_mut().insert(metadata);
        if let Some(identity) = identity {
            req.extensions_mut().insert(Arc::new(identity));
        }

        self.inner.call(req)
    }
}
