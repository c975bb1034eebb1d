// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use super::BackoffStrategy;

/// Default ceiling for [`ExponentialBackoff`].
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Always waits the same amount of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
	delay: Duration,
}

impl ConstantBackoff {
	pub fn new(delay: Duration) -> Self {
		Self { delay }
	}
}

impl BackoffStrategy for ConstantBackoff {
	fn current_delay(&self) -> Duration {
		self.delay
	}

	fn advance(&mut self) {}

	fn is_exhausted(&self) -> bool {
		false
	}

	fn reset(&mut self) {}
}

/// Doubles the delay on every advance, up to a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
	initial: Duration,
	max: Duration,
	current: Duration,
}

impl ExponentialBackoff {
	pub fn new(initial: Duration) -> Self {
		Self::with_max(initial, DEFAULT_MAX_DELAY)
	}

	pub fn with_max(initial: Duration, max: Duration) -> Self {
		let initial = initial.min(max);
		Self {
			initial,
			max,
			current: initial,
		}
	}
}

impl BackoffStrategy for ExponentialBackoff {
	fn current_delay(&self) -> Duration {
		self.current
	}

	fn advance(&mut self) {
		self.current = self.current.saturating_mul(2).min(self.max);
	}

	fn is_exhausted(&self) -> bool {
		false
	}

	fn reset(&mut self) {
		self.current = self.initial;
	}
}

/// Wraps another strategy and reports exhaustion after `max_retries` advances.
#[derive(Debug)]
pub struct BoundedRetryBackoff {
	max_retries: u32,
	retries: u32,
	inner: Box<dyn BackoffStrategy>,
}

impl BoundedRetryBackoff {
	pub fn new(max_retries: u32, inner: impl BackoffStrategy + 'static) -> Self {
		Self {
			max_retries,
			retries: 0,
			inner: Box::new(inner),
		}
	}

	pub fn retries(&self) -> u32 {
		self.retries
	}
}

impl BackoffStrategy for BoundedRetryBackoff {
	fn current_delay(&self) -> Duration {
		self.inner.current_delay()
	}

	/// No-op once exhausted, so the inner delay stays where it stopped.
	fn advance(&mut self) {
		if self.is_exhausted() {
			return;
		}
		self.retries += 1;
		self.inner.advance();
	}

	fn is_exhausted(&self) -> bool {
		self.retries >= self.max_retries
	}

	fn reset(&mut self) {
		self.retries = 0;
		self.inner.reset();
	}
}

/// Runs strategies in sequence, moving on when the current one is exhausted.
///
/// Exhausted only once the final strategy is.
#[derive(Debug)]
pub struct CombinedBackoff {
	strategies: Vec<Box<dyn BackoffStrategy>>,
	index: usize,
}

impl CombinedBackoff {
	/// `strategies` must not be empty.
	pub fn new(strategies: Vec<Box<dyn BackoffStrategy>>) -> Self {
		let mut combined = Self {
			strategies,
			index: 0,
		};
		combined.skip_exhausted();
		combined
	}

	/// Index of the strategy currently supplying delays.
	pub fn current_strategy_index(&self) -> usize {
		self.index
	}

	fn skip_exhausted(&mut self) {
		while self.index + 1 < self.strategies.len() && self.strategies[self.index].is_exhausted() {
			self.index += 1;
		}
	}
}

impl BackoffStrategy for CombinedBackoff {
	fn current_delay(&self) -> Duration {
		self.strategies
			.get(self.index)
			.map(|s| s.current_delay())
			.unwrap_or_default()
	}

	fn advance(&mut self) {
		if let Some(strategy) = self.strategies.get_mut(self.index) {
			strategy.advance();
		}
		self.skip_exhausted();
	}

	fn is_exhausted(&self) -> bool {
		self.strategies
			.get(self.index)
			.map(|s| self.index + 1 == self.strategies.len() && s.is_exhausted())
			.unwrap_or(true)
	}

	fn reset(&mut self) {
		for strategy in &mut self.strategies {
			strategy.reset();
		}
		self.index = 0;
		self.skip_exhausted();
	}
}
