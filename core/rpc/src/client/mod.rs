// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Resilient outbound transport.
//!
//! [`ResilientLayer`] decorates an HTTP transport with bounded retries and
//! an optional circuit breaker. Build it once per outbound client and
//! reuse it for every call: the breaker state is shared by all clones.

mod headers;

pub use headers::{PropagateHeaders, PropagateHeadersLayer};

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{HeaderMap, Request, Response};
use keel_config::backoff::Strategy;
use keel_config::client::{ClientResilienceConfig, RetryConfig};
use keel_config::component::configuration::Configuration;
use keel_config::errors::ConfigError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tower::{BoxError, ServiceExt};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, Outcome};
use crate::errors::kind_of;
use crate::status::ErrorKind;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("circuit breaker {0} is open")]
    CircuitOpen(String),
    #[error("call cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(err) => kind_of(err.as_ref()),
            ClientError::CircuitOpen(_) => ErrorKind::Unavailable,
            ClientError::Cancelled => ErrorKind::Canceled,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen(_))
    }
}

struct Policy {
    name: String,
    retry: RetryConfig,
    breaker: Option<CircuitBreaker>,
}

#[derive(Clone)]
pub struct ResilientLayer {
    policy: Arc<Policy>,
}

impl ResilientLayer {
    pub fn new(
        name: impl Into<String>,
        config: &ClientResilienceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let name = name.into();
        let breaker = if config.circuit_breaker.enabled {
            Some(CircuitBreaker::new(name.clone(), &config.circuit_breaker)?)
        } else {
            None
        };

        Ok(ResilientLayer {
            policy: Arc::new(Policy {
                name,
                retry: config.retry.clone(),
                breaker,
            }),
        })
    }

    /// The breaker guarding this client, if enabled.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.policy.breaker.as_ref()
    }
}

impl<S> Layer<S> for ResilientLayer {
    type Service = ResilientService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResilientService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ResilientService<S> {
    inner: S,
    policy: Arc<Policy>,
}

impl<S> ResilientService<S> {
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.policy.breaker.as_ref()
    }
}

impl<S, B, R> Service<Request<B>> for ResilientService<S>
where
    S: Service<Request<B>, Response = Response<R>> + Clone + Send + 'static,
    S::Error: Into<BoxError> + Send,
    S::Future: Send,
    B: Clone + Send + 'static,
    R: Send + 'static,
{
    type Response = Response<R>;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<Response<R>, ClientError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|e| ClientError::Transport(e.into()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        // keep the instance that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        Box::pin(async move {
            let Some(breaker) = policy.breaker.as_ref() else {
                return retry_loop(&policy, inner, request).await;
            };

            breaker
                .call_with(|| retry_loop(&policy, inner, request), classify)
                .await
                .unwrap_or_else(|_| {
                    debug!(client = %policy.name, "call rejected by open circuit breaker");
                    Err(ClientError::CircuitOpen(policy.name.clone()))
                })
        })
    }
}

async fn retry_loop<S, B, R>(
    policy: &Policy,
    mut inner: S,
    request: Request<B>,
) -> Result<Response<R>, ClientError>
where
    S: Service<Request<B>, Response = Response<R>>,
    S::Error: Into<BoxError>,
    B: Clone,
{
    let cancel = request.extensions().get::<CancellationToken>().cloned();
    let mut delays = policy.retry.get_strategy();
    let mut attempt = 1u32;

    loop {
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ClientError::Cancelled);
        }

        let res = match inner.ready().await {
            Ok(svc) => svc.call(request.clone()).await,
            Err(e) => Err(e),
        };

        let reason = match &res {
            Ok(response) if !is_retryable(response) => None,
            Ok(response) => Some(response.status().to_string()),
            Err(_) => Some("transport error".to_string()),
        };

        let Some((reason, delay)) = reason.zip(delays.next()) else {
            return res.map_err(|e| ClientError::Transport(e.into()));
        };

        // release the failed response before the next attempt
        drop(res);

        warn!(
            client = %policy.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "retrying call"
        );

        match &cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        attempt += 1;
    }
}

/// Transport failures and 5xx responses count against the breaker,
/// cancellation counts as nothing.
fn classify<R>(res: &Result<Response<R>, ClientError>) -> Outcome {
    match res {
        Ok(response) if is_retryable(response) => Outcome::Failure,
        Ok(_) => Outcome::Success,
        Err(ClientError::Cancelled) => Outcome::Ignored,
        Err(_) => Outcome::Failure,
    }
}

/// A response worth retrying: 5xx, or a trailers-only gRPC response whose
/// status is an infrastructure failure.
fn is_retryable<R>(response: &Response<R>) -> bool {
    if response.status().is_server_error() {
        return true;
    }

    grpc_status(response.headers())
        .is_some_and(|code| code != Code::Ok && ErrorKind::from(code).is_infrastructure())
}

fn grpc_status(headers: &HeaderMap) -> Option<Code> {
    headers
        .get("grpc-status")
        .map(|value| Code::from_bytes(value.as_bytes()))
}
