//! Shared retry/backoff policy used by fetch retries and sync-queue retries.
//!
//! Ported from `hack-ink-jwks-cache`'s `RetryPolicy`/`RetryExecutor`, trimmed down from an
//! HTTP-attempt budget (per-attempt timeout, overall deadline) to the plain retry-count
//! model both the fetch and sync paths in this crate need.

use std::cell::RefCell;

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Supported jitter strategies applied on top of the exponential backoff schedule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 80% of the computed backoff and the backoff itself.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry budget shared by [`crate::fetch::FetchController`] and [`crate::sync::SyncQueue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial attempt.
	pub max_retries: u32,
	/// Initial delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> crate::Result<()> {
		if self.initial_backoff.is_zero() {
			return Err(crate::Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(crate::Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}

		Ok(())
	}

	/// Whether another attempt is permitted after `attempt` prior failures.
	pub fn is_retriable(&self, attempt: u32) -> bool {
		attempt < self.max_retries
	}

	/// Compute backoff for a retry attempt (0-indexed) using the selected jitter strategy.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, attempt)
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_backoff: Duration::from_millis(200),
			max_backoff: Duration::from_secs(5),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Tracks the next eligible retry instant for a single failing entity (a fetch or a queued
/// change), combining [`RetryPolicy`] backoff with the attempt count.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
	attempt: u32,
	next_eligible_at: Instant,
}
impl Backoff {
	/// Record a failure at `now`, scheduling the next eligible retry per `policy`.
	pub fn record_failure(policy: &RetryPolicy, now: Instant, attempt: u32) -> Self {
		Self { attempt, next_eligible_at: now + policy.backoff(attempt) }
	}

	/// Whether this entity may be retried at `now`.
	pub fn is_eligible(&self, now: Instant) -> bool {
		now >= self.next_eligible_at
	}

	/// Number of attempts that have already failed.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}
