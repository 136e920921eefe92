// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::Meter;
use serde::{Deserialize, Serialize};
use tracing::Level;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TracingConfiguration {
    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_display_thread_names")]
    display_thread_names: bool,

    #[serde(default = "default_display_thread_ids")]
    display_thread_ids: bool,

    #[serde(default)]
    metrics: MetricsConfiguration,
}

// default implementation for TracingConfiguration
impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: default_log_level(),
            display_thread_names: default_display_thread_names(),
            display_thread_ids: default_display_thread_ids(),
            metrics: MetricsConfiguration::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_display_thread_names() -> bool {
    true
}

fn default_display_thread_ids() -> bool {
    false
}

// function to convert string tracing level to tracing::Level
fn resolve_level(level: &str) -> tracing::Level {
    let level = level.to_lowercase();
    match level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default level
    }
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: String) -> Self {
        TracingConfiguration { log_level, ..self }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_thread_ids(self, display_thread_ids: bool) -> Self {
        TracingConfiguration {
            display_thread_ids,
            ..self
        }
    }

    pub fn with_metrics(self, metrics: MetricsConfiguration) -> Self {
        TracingConfiguration { metrics, ..self }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_thread_ids(&self) -> bool {
        self.display_thread_ids
    }

    pub fn metrics(&self) -> &MetricsConfiguration {
        &self.metrics
    }

    /// Set up a subscriber that logs to stdout.
    /// Returns false if a global subscriber was already installed.
    pub fn setup_tracing_subscriber(&self) -> bool {
        tracing_subscriber::fmt::Subscriber::builder()
            .with_max_level(resolve_level(&self.log_level))
            .with_thread_names(self.display_thread_names)
            .with_thread_ids(self.display_thread_ids)
            .try_init()
            .is_ok()
    }
}

/// Metrics backend selection.
///
/// The meter comes from the globally installed OpenTelemetry meter
/// provider; exporter wiring belongs to the hosting process. When metrics
/// are disabled no meter is handed out and every collector built from it is
/// a no-op.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MetricsConfiguration {
    #[serde(default)]
    enabled: bool,

    #[serde(default = "default_meter_name")]
    meter_name: String,
}

impl Default for MetricsConfiguration {
    fn default() -> Self {
        MetricsConfiguration {
            enabled: false,
            meter_name: default_meter_name(),
        }
    }
}

fn default_meter_name() -> String {
    "keel".to_string()
}

impl MetricsConfiguration {
    pub fn enabled(meter_name: &str) -> Self {
        MetricsConfiguration {
            enabled: true,
            meter_name: meter_name.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn meter_name(&self) -> &str {
        &self.meter_name
    }

    /// The meter to record with, if metrics are enabled.
    pub fn meter(&self) -> Option<Meter> {
        if !self.enabled {
            return None;
        }

        let scope = InstrumentationScope::builder(self.meter_name.clone()).build();
        Some(opentelemetry::global::meter_with_scope(scope))
    }
}
