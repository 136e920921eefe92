// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tower::BoxError;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error, info, warn};

use crate::errors::RpcError;
use crate::request::RpcRequest;

/// Classification of a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    BusinessError,
    ServerError,
}

impl CallOutcome {
    pub fn of<U>(res: &Result<U, RpcError>) -> Self {
        match res {
            Ok(_) => CallOutcome::Success,
            Err(e) if e.is_infrastructure() => CallOutcome::ServerError,
            Err(_) => CallOutcome::BusinessError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::BusinessError => "business_error",
            CallOutcome::ServerError => "server_error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoggingLayer {
    slow_threshold: Duration,
    log_request_payload: bool,
    log_response_payload: bool,
}

impl LoggingLayer {
    pub fn new(slow_threshold: Duration) -> Self {
        LoggingLayer {
            slow_threshold,
            log_request_payload: false,
            log_response_payload: false,
        }
    }

    pub fn with_payloads(self, request: bool, response: bool) -> Self {
        LoggingLayer {
            log_request_payload: request,
            log_response_payload: response,
            ..self
        }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging {
            inner,
            config: *self,
        }
    }
}

/// Innermost stage. Logs start and completion of every call and tags the
/// handler's error so the stages above see an [`RpcError`].
#[derive(Debug, Clone)]
pub struct Logging<S> {
    inner: S,
    config: LoggingLayer,
}

impl<S, T, U> Service<RpcRequest<T>> for Logging<S>
where
    S: Service<RpcRequest<T>, Response = U>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    T: Debug,
    U: Debug + Send + 'static,
{
    type Response = U;
    type Error = RpcError;
    type Future = BoxFuture<'static, Result<U, RpcError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RpcError::from_error)
    }

    fn call(&mut self, req: RpcRequest<T>) -> Self::Future {
        let procedure = req.procedure().to_string();
        let user_id = req
            .identity()
            .map(|identity| identity.user_id().to_string())
            .unwrap_or_default();
        let (request_id, remote_ip) = req
            .metadata()
            .map(|m| (m.request_id.clone().unwrap_or_default(), m.remote_ip.clone()))
            .unwrap_or_default();

        debug!(
            procedure = %procedure,
            user_id = %user_id,
            request_id = %request_id,
            remote_ip = %remote_ip,
            "rpc started"
        );
        if self.config.log_request_payload {
            debug!(procedure = %procedure, payload = ?req.message(), "rpc request payload");
        }

        let config = self.config;
        let start = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let res = fut.await.map_err(RpcError::from_error);
            let elapsed = start.elapsed();
            let duration_ms = elapsed.as_secs_f64() * 1000.0;
            let outcome = CallOutcome::of(&res);
            let code = match &res {
                Ok(_) => "ok",
                Err(e) => e.kind().as_str(),
            };

            match (&res, outcome) {
                (Err(e), CallOutcome::ServerError) => error!(
                    procedure = %procedure,
                    duration_ms,
                    code,
                    outcome = %outcome.as_str(),
                    user_id = %user_id,
                    request_id = %request_id,
                    remote_ip = %remote_ip,
                    error = %e,
                    "rpc completed"
                ),
                (Err(e), _) => info!(
                    procedure = %procedure,
                    duration_ms,
                    code,
                    outcome = %outcome.as_str(),
                    user_id = %user_id,
                    request_id = %request_id,
                    remote_ip = %remote_ip,
                    error = %e,
                    "rpc completed"
                ),
                (Ok(_), _) => info!(
                    procedure = %procedure,
                    duration_ms,
                    code,
                    outcome = %outcome.as_str(),
                    user_id = %user_id,
                    request_id = %request_id,
                    remote_ip = %remote_ip,
                    "rpc completed"
                ),
            }

            if elapsed > config.slow_threshold {
                warn!(
                    procedure = %procedure,
                    duration_ms,
                    slow_threshold_ms = config.slow_threshold.as_millis() as u64,
                    "slow rpc"
                );
            }

            if config.log_response_payload {
                if let Ok(msg) = &res {
                    debug!(procedure = %procedure, payload = ?msg, "rpc response payload");
                }
            }

            res
        })
    }
}
