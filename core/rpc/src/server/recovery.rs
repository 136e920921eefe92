// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::FutureExt;
use futures::future::CatchUnwind;
use pin_project::pin_project;
use tonic::Status;
use tower_layer::Layer;
use tower_service::Service;
use tracing::error;

use crate::request::{Procedure, RpcRequest};

/// Outermost stage: a panic anywhere below becomes an `Internal` status.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        RecoveryLayer
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Recovery<S> {
    inner: S,
}

impl<S, T, U> Service<RpcRequest<T>> for Recovery<S>
where
    S: Service<RpcRequest<T>, Response = U, Error = Status>,
{
    type Response = U;
    type Error = Status;
    type Future = RecoveryFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RpcRequest<T>) -> Self::Future {
        let procedure = req.procedure().clone();

        // a stage may panic while building its future, not only while polling it
        match catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(fut) => RecoveryFuture::Running {
                inner: AssertUnwindSafe(fut).catch_unwind(),
                procedure,
            },
            Err(panic) => RecoveryFuture::Panicked {
                status: Some(recovered(&procedure, panic)),
            },
        }
    }
}

#[pin_project(project = RecoveryProj)]
pub enum RecoveryFuture<F> {
    Running {
        #[pin]
        inner: CatchUnwind<AssertUnwindSafe<F>>,
        procedure: Procedure,
    },
    Panicked {
        status: Option<Status>,
    },
}

impl<F, U> Future for RecoveryFuture<F>
where
    F: Future<Output = Result<U, Status>>,
{
    type Output = Result<U, Status>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            RecoveryProj::Running { inner, procedure } => match ready!(inner.poll(cx)) {
                Ok(res) => Poll::Ready(res),
                Err(panic) => Poll::Ready(Err(recovered(procedure, panic))),
            },
            RecoveryProj::Panicked { status } => Poll::Ready(Err(status
                .take()
                .unwrap_or_else(|| Status::internal("internal server error")))),
        }
    }
}

fn recovered(procedure: &Procedure, panic: Box<dyn Any + Send>) -> Status {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    error!(procedure = %procedure, panic = %reason, "recovered from panic in handler");

    Status::internal("internal server error")
}

#[cfg(test)]
mod tests {
    use tower::{ServiceExt, service_fn};

    use super::*;

    #[tokio::test]
    async fn test_panic_in_future_becomes_internal() {
        let svc = RecoveryLayer::new().layer(service_fn(|_req: RpcRequest<()>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), Status>(())
        }));

        let status = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), ()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("exploded"));
    }

    #[derive(Clone)]
    struct PanicsOnCall;

    impl Service<RpcRequest<()>> for PanicsOnCall {
        type Response = ();
        type Error = Status;
        type Future = futures::future::Ready<Result<(), Status>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: RpcRequest<()>) -> Self::Future {
            panic!("call exploded")
        }
    }

    #[tokio::test]
    async fn test_panic_in_call_becomes_internal() {
        let svc = RecoveryLayer::new().layer(PanicsOnCall);
        let status = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), ()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_passthrough() {
        let svc = RecoveryLayer::new().layer(service_fn(|req: RpcRequest<u32>| async move {
            Ok::<u32, Status>(req.into_message() + 1)
        }));
        let res = svc
            .oneshot(RpcRequest::new(Procedure::new("/t.S/M"), 1))
            .await
            .unwrap();
        assert_eq!(res, 2);
    }
}
