// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use http::{HeaderMap, HeaderName};
use pin_project::pin_project;
use tokio::time::Instant;
use tonic::Status;
use tower_layer::Layer;
use tower_service::Service;
use tracing::error;

use crate::request::{Procedure, RpcRequest};

use super::logging::CallOutcome;

/// Absolute deadline of the current call, stored in the request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn new(at: Instant) -> Self {
        Deadline { at }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

// roughly 30 years, the horizon used when a timeout does not fit an Instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE.min(timeout))
}

/// Timeout for a call: the header value in milliseconds when it is a
/// positive integer below `default`, `default` otherwise.
pub fn effective_timeout(default: Duration, headers: &HeaderMap, header: &HeaderName) -> Duration {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64))
        .filter(|requested| *requested < default)
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    default: Duration,
    header: HeaderName,
}

impl TimeoutLayer {
    pub fn new(default: Duration, header: HeaderName) -> Self {
        TimeoutLayer { default, header }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            default: self.default,
            header: self.header.clone(),
        }
    }
}

/// Bounds every call by its effective timeout. The deadline is also
/// exposed to inner stages and the handler as a [`Deadline`] extension.
#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    default: Duration,
    header: HeaderName,
}

impl<S, T, U> Service<RpcRequest<T>> for Timeout<S>
where
    S: Service<RpcRequest<T>, Response = U, Error = Status>,
{
    type Response = U;
    type Error = Status;
    type Future = TimeoutFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RpcRequest<T>) -> Self::Future {
        let timeout = effective_timeout(self.default, req.headers(), &self.header);
        let deadline = Deadline::new(deadline_after(timeout));
        req.extensions_mut().insert(deadline);

        let procedure = req.procedure().clone();
        TimeoutFuture {
            inner: tokio::time::timeout_at(deadline.instant(), self.inner.call(req)),
            timeout,
            procedure,
        }
    }
}

#[pin_project]
pub struct TimeoutFuture<F> {
    #[pin]
    inner: tokio::time::Timeout<F>,
    timeout: Duration,
    procedure: Procedure,
}

impl<F, U> Future for TimeoutFuture<F>
where
    F: Future<Output = Result<U, Status>>,
{
    type Output = Result<U, Status>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.inner.poll(cx)) {
            Ok(res) => Poll::Ready(res),
            Err(_elapsed) => {
                // inner stages are dropped with the handler, so this is the
                // only record of the call
                error!(
                    procedure = %this.procedure,
                    timeout_ms = this.timeout.as_millis() as u64,
                    code = "deadline_exceeded",
                    outcome = %CallOutcome::ServerError.as_str(),
                    "rpc deadline exceeded"
                );
                Poll::Ready(Err(Status::deadline_exceeded(format!(
                    "deadline of {}ms exceeded",
                    this.timeout.as_millis()
                ))))
            }
        }
    }
}
