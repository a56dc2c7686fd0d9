use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Capped, jittered exponential retry schedule.
///
/// `delay(n)` is the wait after the `n`th consecutive failure (0-based):
/// `initial * multiplier^n`, capped at `max`, then scaled by a random factor
/// in `[1 - jitter, 1 + jitter]` and capped again.
#[derive(Debug, Clone)]
pub struct Backoff {
	initial: Duration,
	max: Duration,
	multiplier: f64,
	jitter: f64,
	max_attempts: Option<u32>,
	rng: StdRng,
}

impl Backoff {
	/// Creates a schedule doubling from `initial` up to `max`, with 20% jitter.
	pub fn new(initial: Duration, max: Duration) -> Self {
		Self {
			initial,
			max: max.max(initial),
			multiplier: 2.0,
			jitter: 0.2,
			max_attempts: None,
			rng: StdRng::from_os_rng(),
		}
	}

	#[must_use]
	pub fn multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier.max(1.0);
		self
	}

	/// Sets the jitter fraction, clamped to `[0, 1]`.
	#[must_use]
	pub fn jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter.clamp(0.0, 1.0);
		self
	}

	/// Limits retries; `None` retries forever.
	#[must_use]
	pub fn max_attempts(mut self, max_attempts: Option<u32>) -> Self {
		self.max_attempts = max_attempts;
		self
	}

	/// Reseeds the jitter source for reproducible schedules.
	#[must_use]
	pub fn seed(mut self, seed: u64) -> Self {
		self.rng = StdRng::seed_from_u64(seed);
		self
	}

	/// Deterministic part of the delay before jitter.
	pub fn base_delay(&self, attempt: u32) -> Duration {
		let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
		let secs = self.initial.as_secs_f64() * factor;
		if !secs.is_finite() || secs >= self.max.as_secs_f64() {
			return self.max;
		}
		Duration::from_secs_f64(secs)
	}

	/// Delay after the `attempt`th consecutive failure, or `None` once the
	/// retry budget is spent.
	pub fn delay(&mut self, attempt: u32) -> Option<Duration> {
		if self.max_attempts.is_some_and(|max| attempt >= max) {
			return None;
		}
		let base = self.base_delay(attempt);
		if self.jitter == 0.0 {
			return Some(base);
		}
		let spread = self.rng.random_range(-1.0_f64..=1.0) * self.jitter;
		let jittered = base.as_secs_f64() * (1.0 + spread);
		Some(Duration::from_secs_f64(jittered.max(0.0)).min(self.max))
	}
}
