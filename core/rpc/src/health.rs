// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Health checkers, registered once at startup.
//!
//! The registry is an ordinary value: build it, then hand it to whatever
//! serves health checks. There is no process-wide list to mutate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::time::Instant;
use tower::BoxError;
use tracing::warn;

#[async_trait]
pub trait HealthChecker: Send + Sync + 'static {
    /// Check one dependency. An error marks the service as not serving.
    async fn check(&self) -> Result<(), BoxError>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HealthError {
    #[error("health checker already registered: {0}")]
    DuplicateChecker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Serving,
    NotServing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl CheckResult {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
}

pub struct HealthRegistryBuilder {
    checkers: Vec<(String, Arc<dyn HealthChecker>)>,
    timeout: Duration,
}

impl Default for HealthRegistryBuilder {
    fn default() -> Self {
        HealthRegistryBuilder {
            checkers: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl HealthRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound for a single check.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        HealthRegistryBuilder { timeout, ..self }
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        checker: impl HealthChecker,
    ) -> Result<Self, HealthError> {
        let name = name.into();
        if self.checkers.iter().any(|(n, _)| *n == name) {
            return Err(HealthError::DuplicateChecker(name));
        }

        self.checkers.push((name, Arc::new(checker)));
        Ok(self)
    }

    pub fn build(self) -> HealthRegistry {
        HealthRegistry {
            checkers: self.checkers.into(),
            timeout: self.timeout,
        }
    }
}

/// Immutable set of health checkers. Cheap to clone.
#[derive(Clone)]
pub struct HealthRegistry {
    checkers: Arc<[(String, Arc<dyn HealthChecker>)]>,
    timeout: Duration,
}

impl HealthRegistry {
    pub fn builder() -> HealthRegistryBuilder {
        HealthRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Run every checker concurrently. Results keep registration order.
    pub async fn check_all(&self) -> HealthReport {
        let checks = join_all(self.checkers.iter().map(|(name, checker)| async move {
            let start = Instant::now();
            let error = match tokio::time::timeout(self.timeout, checker.check()).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", self.timeout)),
            };

            if let Some(error) = &error {
                warn!(checker = %name, %error, "health check failed");
            }

            CheckResult {
                name: name.clone(),
                error,
                duration: start.elapsed(),
            }
        }))
        .await;

        let status = if checks.iter().all(CheckResult::is_healthy) {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        };

        HealthReport { status, checks }
    }
}
