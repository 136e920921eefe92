// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;

pub trait Strategy {
    /// Delays to wait before each retry. The iterator yields one item per
    /// allowed retry, so an empty iterator means "do not retry".
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send>;
}

/// Doubling backoff: `initial * 2^n` for the n-th retry, capped at `max`.
pub fn doubling(initial: Duration, max: Duration) -> impl Iterator<Item = Duration> + Send {
    let initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);

    // the first delay of base 2 is 2 * factor, halve every item
    ExponentialBackoff::from_millis(2)
        .factor(initial_ms)
        .max_delay(max.saturating_mul(2))
        .map(|delay| delay / 2)
}
