// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconnect backoff.
//!
//! A [`BackoffStrategy`] is a pure delay schedule. [`BackoffService`] adds
//! jitter and performs the actual, cancellable, wait.

mod strategies;

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use strategies::{
	BoundedRetryBackoff, CombinedBackoff, ConstantBackoff, ExponentialBackoff, DEFAULT_MAX_DELAY,
};

/// A delay schedule.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
	/// Delay to wait before the next attempt.
	fn current_delay(&self) -> Duration;

	/// Moves to the next step of the schedule.
	fn advance(&mut self);

	fn is_exhausted(&self) -> bool;

	/// Rewinds to the first step.
	fn reset(&mut self);
}

/// The reconnect policy for streaming sync.
///
/// One free retry with no delay, then exponential growth from `initial` to
/// `max`. The strategy index tells callers whether a failure falls inside the
/// free retry.
pub fn reconnect_strategy(initial: Duration, max: Duration) -> CombinedBackoff {
	CombinedBackoff::new(vec![
		Box::new(BoundedRetryBackoff::new(1, ConstantBackoff::new(Duration::ZERO))),
		Box::new(ExponentialBackoff::with_max(initial, max)),
	])
}

/// Applies a strategy with uniform jitter and waits it out.
#[derive(Debug)]
pub struct BackoffService<S> {
	strategy: S,
	jitter: Duration,
}

impl<S: BackoffStrategy> BackoffService<S> {
	pub fn new(strategy: S, jitter: Duration) -> Self {
		Self { strategy, jitter }
	}

	pub fn strategy(&self) -> &S {
		&self.strategy
	}

	/// The delay for the next wait, jitter included. Advances the schedule.
	pub fn next_delay(&mut self) -> Duration {
		let base = self.strategy.current_delay();
		self.strategy.advance();
		base + self.random_jitter()
	}

	/// Sleeps for the next delay. Returns `false` if cancelled first.
	pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
		let delay = self.next_delay();
		debug!(delay_ms = delay.as_millis() as u64, "backing off");

		tokio::select! {
			_ = tokio::time::sleep(delay) => true,
			_ = cancel.cancelled() => false,
		}
	}

	pub fn reset(&mut self) {
		self.strategy.reset();
	}

	fn random_jitter(&self) -> Duration {
		let max_ms = self.jitter.as_millis() as u64;
		if max_ms == 0 {
			return Duration::ZERO;
		}
		Duration::from_millis(fastrand::u64(0..=max_ms))
	}
}
