// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::future::Either;
use pin_project::{pin_project, pinned_drop};
use tokio::time::Instant;
use tonic::Status;
use tower_layer::Layer;
use tower_service::Service;

use crate::metrics::{MetricRecord, MetricsCollector};
use crate::request::{Procedure, RpcRequest};
use crate::status::{ErrorKind, code_label};

use super::timeout::Deadline;

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    collector: MetricsCollector,
}

impl MetricsLayer {
    pub fn new(collector: MetricsCollector) -> Self {
        MetricsLayer { collector }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = Metrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Metrics {
            inner,
            collector: self.collector.clone(),
        }
    }
}

/// Records one [`MetricRecord`] per call. With a disabled collector the
/// inner future is returned untouched.
///
/// A call dropped before completing is still recorded: `internal` while
/// unwinding from a panic, `deadline_exceeded` past its deadline,
/// `canceled` otherwise.
#[derive(Debug, Clone)]
pub struct Metrics<S> {
    inner: S,
    collector: MetricsCollector,
}

impl<S, T, U> Service<RpcRequest<T>> for Metrics<S>
where
    S: Service<RpcRequest<T>, Response = U, Error = Status>,
    T: prost::Message,
    U: prost::Message,
{
    type Response = U;
    type Error = Status;
    type Future = Either<S::Future, MetricsFuture<S::Future>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RpcRequest<T>) -> Self::Future {
        if !self.collector.is_enabled() {
            return Either::Left(self.inner.call(req));
        }

        let procedure = req.procedure().clone();
        let request_bytes = req.message().encoded_len() as u64;
        let deadline = req.extensions().get::<Deadline>().copied();

        Either::Right(MetricsFuture {
            inner: self.inner.call(req),
            collector: self.collector.clone(),
            procedure,
            request_bytes,
            deadline,
            start: Instant::now(),
            recorded: false,
        })
    }
}

#[pin_project(PinnedDrop)]
pub struct MetricsFuture<F> {
    #[pin]
    inner: F,
    collector: MetricsCollector,
    procedure: Procedure,
    request_bytes: u64,
    deadline: Option<Deadline>,
    start: Instant,
    recorded: bool,
}

impl<F, U> Future for MetricsFuture<F>
where
    F: Future<Output = Result<U, Status>>,
    U: prost::Message,
{
    type Output = Result<U, Status>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let res = ready!(this.inner.poll(cx));

        let (status, response_bytes) = match &res {
            Ok(msg) => ("ok", Some(msg.encoded_len() as u64)),
            Err(status) => (code_label(status.code()), None),
        };

        *this.recorded = true;
        this.collector.record(&MetricRecord {
            service: this.procedure.service(),
            method: this.procedure.method(),
            status,
            duration: this.start.elapsed(),
            request_bytes: Some(*this.request_bytes),
            response_bytes,
        });

        Poll::Ready(res)
    }
}

#[pinned_drop]
impl<F> PinnedDrop for MetricsFuture<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if *this.recorded {
            return;
        }

        let kind = match this.deadline {
            _ if std::thread::panicking() => ErrorKind::Internal,
            Some(deadline) if deadline.is_expired() => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Canceled,
        };

        this.collector.record(&MetricRecord {
            service: this.procedure.service(),
            method: this.procedure.method(),
            status: kind.as_str(),
            duration: this.start.elapsed(),
            request_bytes: Some(*this.request_bytes),
            response_bytes: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::metrics::InMemoryBackend;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Echo {
        #[prost(string, tag = "1")]
        text: String,
    }

    #[tokio::test]
    async fn test_records_real_payload_sizes() {
        let backend = InMemoryBackend::default();
        let svc = MetricsLayer::new(MetricsCollector::with_backend(backend.clone())).layer(
            service_fn(|req: RpcRequest<Echo>| async move {
                let text = req.into_message().text.repeat(2);
                Ok::<_, Status>(Echo { text })
            }),
        );

        let req = RpcRequest::new(
            Procedure::new("/echo.v1.Echo/Say"),
            Echo {
                text: "hello".to_string(),
            },
        );
        svc.oneshot(req).await.unwrap();

        let records = backend.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service, "echo.v1.Echo");
        assert_eq!(records[0].method, "Say");
        assert_eq!(records[0].status, "ok");
        // tag + length + 5 bytes, then tag + length + 10 bytes
        assert_eq!(records[0].request_bytes, Some(7));
        assert_eq!(records[0].response_bytes, Some(12));
    }

    #[tokio::test]
    async fn test_records_error_status() {
        let backend = InMemoryBackend::default();
        let svc = MetricsLayer::new(MetricsCollector::with_backend(backend.clone())).layer(
            service_fn(|_req: RpcRequest<Echo>| async move {
                Err::<Echo, _>(Status::not_found("missing"))
            }),
        );

        let _ = svc
            .oneshot(RpcRequest::new(Procedure::new("/e.E/Get"), Echo::default()))
            .await;

        let records = backend.records();
        assert_eq!(records[0].status, "not_found");
        assert_eq!(records[0].response_bytes, None);
    }

    #[tokio::test]
    async fn test_disabled_collector_passes_through() {
        let svc = MetricsLayer::new(MetricsCollector::disabled()).layer(service_fn(
            |req: RpcRequest<Echo>| async move { Ok::<_, Status>(req.into_message()) },
        ));

        let res = svc
            .oneshot(RpcRequest::new(
                Procedure::new("/e.E/Get"),
                Echo {
                    text: "x".to_string(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(res.text, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_past_deadline_is_recorded() {
        let backend = InMemoryBackend::default();
        let svc = MetricsLayer::new(MetricsCollector::with_backend(backend.clone())).layer(
            service_fn(|req: RpcRequest<Echo>| async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok::<_, Status>(req.into_message())
            }),
        );

        let mut req = RpcRequest::new(Procedure::new("/e.E/Slow"), Echo::default());
        let deadline = Instant::now() + std::time::Duration::from_secs(1);
        req.extensions_mut().insert(Deadline::new(deadline));

        let res = tokio::time::timeout_at(deadline, svc.oneshot(req)).await;
        assert!(res.is_err());

        let records = backend.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "deadline_exceeded");
    }
}
