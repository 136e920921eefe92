// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server side interceptor pipeline.
//!
//! Stages run outermost first:
//! recovery, timeout, identity, metrics, error mapping, logging, handler.
//! Responses and errors unwind in reverse.

pub mod error_mapping;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod timeout;

use std::fmt;

use keel_config::component::configuration::Configuration;
use keel_config::errors::ConfigError;
use keel_config::server::ServerGovernanceConfig;
use tower::{ServiceBuilder, ServiceExt};
use tower_layer::Layer;
use tower_service::Service;
use tracing::info;

use crate::identity::IdentityHeaders;
use crate::metrics::MetricsCollector;
use crate::request::{Procedure, RpcRequest};

pub use error_mapping::{ErrorMappingLayer, MapErrors};
pub use identity::{IdentityLayer, InjectIdentity};
pub use logging::{CallOutcome, Logging, LoggingLayer};
pub use metrics::{Metrics, MetricsLayer};
pub use recovery::{Recovery, RecoveryLayer};
pub use timeout::{Deadline, Timeout, TimeoutLayer};

/// A stage of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recovery,
    Timeout,
    Identity,
    Metrics,
    ErrorMapping,
    Logging,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Recovery,
        Stage::Timeout,
        Stage::Identity,
        Stage::Metrics,
        Stage::ErrorMapping,
        Stage::Logging,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Recovery => "recovery",
            Stage::Timeout => "timeout",
            Stage::Identity => "identity",
            Stage::Metrics => "metrics",
            Stage::ErrorMapping => "error_mapping",
            Stage::Logging => "logging",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler wrapped by every stage.
pub type Pipeline<S> = Recovery<Timeout<InjectIdentity<Metrics<MapErrors<Logging<S>>>>>>;

/// The stages of one service, built once before serving and shared read
/// only by every call.
#[derive(Debug, Clone)]
pub struct InterceptorChain {
    service_name: String,
    recovery: RecoveryLayer,
    timeout: TimeoutLayer,
    identity: IdentityLayer,
    metrics: MetricsLayer,
    error_mapping: ErrorMappingLayer,
    logging: LoggingLayer,
}

impl InterceptorChain {
    /// Validate `config` and build the stages. `collector` is ignored when
    /// the config disables metrics.
    pub fn new(
        config: ServerGovernanceConfig,
        collector: MetricsCollector,
    ) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        let headers = IdentityHeaders::new(&config.headers)?;

        let collector = if config.metrics_enabled {
            collector
        } else {
            MetricsCollector::disabled()
        };

        info!(
            service = %config.service_name,
            default_timeout_ms = config.default_timeout.as_millis() as u64,
            metrics = collector.is_enabled(),
            "interceptor chain built"
        );

        Ok(InterceptorChain {
            service_name: config.service_name,
            recovery: RecoveryLayer::new(),
            timeout: TimeoutLayer::new(config.default_timeout, headers.timeout().clone()),
            identity: IdentityLayer::new(headers),
            metrics: MetricsLayer::new(collector),
            error_mapping: ErrorMappingLayer::new(),
            logging: LoggingLayer::new(config.slow_threshold)
                .with_payloads(config.log_request_payload, config.log_response_payload),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn stages(&self) -> &'static [Stage] {
        &Stage::ORDER
    }

    /// Wrap a business handler with every stage.
    pub fn service<S>(&self, handler: S) -> Pipeline<S> {
        ServiceBuilder::new()
            .layer(self.recovery)
            .layer(self.timeout.clone())
            .layer(self.identity.clone())
            .layer(self.metrics.clone())
            .layer(self.error_mapping)
            .layer(self.logging)
            .service(handler)
    }
}

impl<S> Layer<S> for InterceptorChain {
    type Service = Pipeline<S>;

    fn layer(&self, inner: S) -> Self::Service {
        self.service(inner)
    }
}

/// Run one tonic unary call through a pipeline.
pub async fn call_unary<S, T, U>(
    service: S,
    procedure: Procedure,
    request: tonic::Request<T>,
) -> Result<tonic::Response<U>, tonic::Status>
where
    S: Service<RpcRequest<T>, Response = U, Error = tonic::Status>,
{
    service
        .oneshot(RpcRequest::from_tonic(procedure, request))
        .await
        .map(tonic::Response::new)
}
