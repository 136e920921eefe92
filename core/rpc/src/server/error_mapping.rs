// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::task::{Context, Poll};

use futures::TryFutureExt;
use futures::future::MapErr;
use tonic::Status;
use tower::BoxError;
use tower_layer::Layer;
use tower_service::Service;

use crate::errors::RpcError;
use crate::request::RpcRequest;

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMappingLayer;

impl ErrorMappingLayer {
    pub fn new() -> Self {
        ErrorMappingLayer
    }
}

impl<S> Layer<S> for ErrorMappingLayer {
    type Service = MapErrors<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MapErrors { inner }
    }
}

/// Normalizes every error coming from below into a taxonomy derived wire
/// status. Untagged errors become `Internal`.
#[derive(Debug, Clone)]
pub struct MapErrors<S> {
    inner: S,
}

impl<S, T> Service<RpcRequest<T>> for MapErrors<S>
where
    S: Service<RpcRequest<T>>,
    S::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = Status;
    type Future = MapErr<S::Future, fn(S::Error) -> Status>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(to_status)
    }

    fn call(&mut self, req: RpcRequest<T>) -> Self::Future {
        self.inner
            .call(req)
            .map_err(to_status::<S::Error> as fn(S::Error) -> Status)
    }
}

/// Wire status for any error.
pub fn to_status<E: Into<BoxError>>(err: E) -> Status {
    RpcError::from_error(err).to_status()
}

#[cfg(test)]
mod tests {
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::request::Procedure;

    #[derive(thiserror::Error, Debug)]
    #[error("disk on fire")]
    struct Untagged;

    #[tokio::test]
    async fn test_tagged_error_keeps_kind() {
        let svc = ErrorMappingLayer::new().layer(service_fn(|_req: RpcRequest<()>| async move {
            Err::<(), _>(RpcError::not_found("order 7"))
        }));

        let status = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), ()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "order 7");
    }

    #[tokio::test]
    async fn test_untagged_error_is_internal() {
        let svc = ErrorMappingLayer::new().layer(service_fn(|_req: RpcRequest<()>| async move {
            Err::<(), _>(Untagged)
        }));

        let status = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), ()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_io_error_is_classified() {
        let svc = ErrorMappingLayer::new().layer(service_fn(|_req: RpcRequest<()>| async move {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "db down",
            ))
        }));

        let status = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), ()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
