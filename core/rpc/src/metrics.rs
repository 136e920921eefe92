// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per call metrics.
//!
//! Whether metrics are recorded is decided once, when the collector is
//! built. A disabled collector costs one branch per call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// One finished call. Lives only for the duration of `record`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord<'a> {
    pub service: &'a str,
    pub method: &'a str,
    pub status: &'static str,
    pub duration: Duration,
    pub request_bytes: Option<u64>,
    pub response_bytes: Option<u64>,
}

/// Destination of metric records. Implementations must be cheap and must
/// not block: record into in-memory instruments, export elsewhere.
pub trait MetricsBackend: Send + Sync + 'static {
    fn record(&self, record: &MetricRecord<'_>);
}

/// OpenTelemetry instruments, pre-aggregated by the SDK.
pub struct OtelBackend {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    request_size: Histogram<u64>,
    response_size: Histogram<u64>,
}

impl OtelBackend {
    pub fn new(meter: &Meter) -> Self {
        OtelBackend {
            requests: meter
                .u64_counter("rpc.server.requests")
                .with_description("Completed unary calls")
                .build(),
            duration: meter
                .f64_histogram("rpc.server.duration")
                .with_description("Duration of unary calls")
                .with_unit("ms")
                .build(),
            request_size: meter
                .u64_histogram("rpc.server.request.size")
                .with_description("Encoded size of request messages")
                .with_unit("By")
                .build(),
            response_size: meter
                .u64_histogram("rpc.server.response.size")
                .with_description("Encoded size of response messages")
                .with_unit("By")
                .build(),
        }
    }
}

impl MetricsBackend for OtelBackend {
    fn record(&self, record: &MetricRecord<'_>) {
        let attributes = [
            KeyValue::new("service", record.service.to_string()),
            KeyValue::new("method", record.method.to_string()),
            KeyValue::new("status", record.status),
        ];

        self.requests.add(1, &attributes);
        self.duration
            .record(record.duration.as_secs_f64() * 1000.0, &attributes);
        if let Some(bytes) = record.request_bytes {
            self.request_size.record(bytes, &attributes);
        }
        if let Some(bytes) = record.response_bytes {
            self.response_size.record(bytes, &attributes);
        }
    }
}

/// Handle shared by every call of a server.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl MetricsCollector {
    /// Collector recording to `meter`, or a no-op one without a meter.
    pub fn new(meter: Option<&Meter>) -> Self {
        match meter {
            Some(meter) => Self::with_backend(OtelBackend::new(meter)),
            None => Self::disabled(),
        }
    }

    pub fn with_backend(backend: impl MetricsBackend) -> Self {
        MetricsCollector {
            backend: Some(Arc::new(backend)),
        }
    }

    pub fn disabled() -> Self {
        MetricsCollector { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn record(&self, record: &MetricRecord<'_>) {
        if let Some(backend) = &self.backend {
            backend.record(record);
        }
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Records kept in memory, for tests and local inspection.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<parking_lot::Mutex<Vec<OwnedMetricRecord>>>,
}

/// Owned copy of a [`MetricRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedMetricRecord {
    pub service: String,
    pub method: String,
    pub status: &'static str,
    pub duration: Duration,
    pub request_bytes: Option<u64>,
    pub response_bytes: Option<u64>,
}

impl InMemoryBackend {
    pub fn records(&self) -> Vec<OwnedMetricRecord> {
        self.records.lock().clone()
    }
}

impl MetricsBackend for InMemoryBackend {
    fn record(&self, record: &MetricRecord<'_>) {
        self.records.lock().push(OwnedMetricRecord {
            service: record.service.to_string(),
            method: record.method.to_string(),
            status: record.status,
            duration: record.duration,
            request_bytes: record.request_bytes,
            response_bytes: record.response_bytes,
        });
    }
}
