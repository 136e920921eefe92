// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Three state circuit breaker.
//!
//! State, failure counter, transition time and half-open slots live behind
//! one lock and always change together. The open to half-open transition
//! happens lazily on the first call after the cool-down, no timer task is
//! involved.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use keel_config::client::CircuitBreakerConfig;
use keel_config::component::configuration::Configuration;
use keel_config::errors::ConfigError;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// How a guarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Neither: the slot is released and no counter moves (cancellation).
    Ignored,
}

/// The breaker rejected the call without running it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct BreakerOpen;

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_transition: Instant,
    half_open_in_flight: u32,
    // bumped on every transition, outcomes of older permits are discarded
    generation: u64,
}

impl BreakerInner {
    fn transition(&mut self, state: BreakerState, now: Instant) {
        self.state = state;
        self.last_transition = now;
        self.half_open_in_flight = 0;
        self.generation += 1;
        if state == BreakerState::Closed {
            self.consecutive_failures = 0;
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cool_down: Duration,
    half_open_max_calls: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: &CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(CircuitBreaker {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            cool_down: config.cool_down,
            half_open_max_calls: config.half_open_max_calls,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                half_open_in_flight: 0,
                generation: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose cool-down elapsed still reads
    /// `Open` until the next call moves it to half-open.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Ask to run one call. The returned permit must be given the outcome
    /// of the call; dropping it unrecorded counts as [`Outcome::Ignored`].
    pub fn try_acquire(&self) -> Result<Permit<'_>, BreakerOpen> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::Open {
            if now.duration_since(inner.last_transition) < self.cool_down {
                return Err(BreakerOpen);
            }
            inner.transition(BreakerState::HalfOpen, now);
            info!(breaker = %self.name, "circuit breaker half-open, allowing trial calls");
        }

        let trial = inner.state == BreakerState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.half_open_max_calls {
                return Err(BreakerOpen);
            }
            inner.half_open_in_flight += 1;
        }

        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            trial,
            outcome: Outcome::Ignored,
        })
    }

    /// Run `f` behind the breaker, classifying its result with `classify`.
    pub async fn call_with<F, Fut, R, C>(&self, f: F, classify: C) -> Result<R, BreakerOpen>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
        C: FnOnce(&R) -> Outcome,
    {
        let permit = self.try_acquire()?;
        let res = f().await;
        permit.record(classify(&res));
        Ok(res)
    }

    /// Run `f` behind the breaker. Any `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let res = self
            .call_with(f, |res| match res {
                Ok(_) => Outcome::Success,
                Err(_) => Outcome::Failure,
            })
            .await;

        match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BreakerError::Inner(e)),
            Err(BreakerOpen) => Err(BreakerError::Open),
        }
    }

    fn complete(&self, generation: u64, trial: bool, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.generation != generation {
            return;
        }

        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match (inner.state, outcome) {
            (_, Outcome::Ignored) => {}
            (BreakerState::Closed, Outcome::Success) => inner.consecutive_failures = 0,
            (BreakerState::Closed, Outcome::Failure) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.transition(BreakerState::Open, now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            (BreakerState::HalfOpen, Outcome::Success) => {
                inner.transition(BreakerState::Closed, now);
                info!(breaker = %self.name, "circuit breaker closed after successful trial");
            }
            (BreakerState::HalfOpen, Outcome::Failure) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.transition(BreakerState::Open, now);
                warn!(breaker = %self.name, "trial call failed, circuit breaker reopened");
            }
            // permits are never handed out while open
            (BreakerState::Open, _) => {}
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .finish()
    }
}

/// Right to run one call through a [`CircuitBreaker`].
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    outcome: Outcome,
}

impl Permit<'_> {
    /// Whether this is a half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.breaker
            .complete(self.generation, self.trial, self.outcome);
    }
}
