//! §4.1 token bucket. Hand-rolled rather than pulled from a crate: the
//! teacher's own `http/localratelimit.rs` forks a small internal `ratelimit`
//! module for the same reason (a published "ratelimit" crate isn't part of
//! its dependency set either) — `try_wait`/`amend_tokens`/`available_refill`
//! map onto `try_acquire`/refill/`available` below.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Classical token bucket, refilled lazily on access rather than via a
/// background task. `qps` is the refill rate, `burst_size` the cap.
pub struct TokenBucket {
	qps: f64,
	burst_size: f64,
	state: Mutex<State>,
}

struct State {
	tokens: f64,
	last_refill: Instant,
}

impl TokenBucket {
	pub fn new(qps: f64, burst_size: u32) -> Self {
		Self {
			qps: qps.max(0.0001),
			burst_size: burst_size.max(1) as f64,
			state: Mutex::new(State {
				tokens: burst_size.max(1) as f64,
				last_refill: Instant::now(),
			}),
		}
	}

	fn refill_locked(&self, state: &mut State) {
		let now = Instant::now();
		let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
		if elapsed > 0.0 {
			state.tokens = (state.tokens + elapsed * self.qps).min(self.burst_size);
			state.last_refill = now;
		}
	}

	/// §4.1 `TryAcquire`.
	pub fn try_acquire(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		self.refill_locked(&mut state);
		if state.tokens >= 1.0 {
			state.tokens -= 1.0;
			true
		} else {
			false
		}
	}

	/// §4.1 `Acquire(ctx)`: blocks (cooperatively) until a token accrues, or
	/// returns `false` if `deadline` elapses first. Busy-waiting is forbidden
	/// (§9), so each failed attempt sleeps exactly the time needed for one
	/// token to refill.
	pub async fn acquire(&self, deadline: Option<Duration>) -> bool {
		let start = Instant::now();
		loop {
			if self.try_acquire() {
				return true;
			}
			let wait = Duration::from_secs_f64(1.0 / self.qps);
			if let Some(d) = deadline {
				if start.elapsed() >= d {
					return false;
				}
			}
			tokio::time::sleep(wait).await;
			if let Some(d) = deadline {
				if start.elapsed() >= d {
					return false;
				}
			}
		}
	}

	/// §4.1 `Available`.
	pub fn available(&self) -> f64 {
		let mut state = self.state.lock().unwrap();
		self.refill_locked(&mut state);
		state.tokens
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn try_acquire_respects_burst() {
		let bucket = TokenBucket::new(1.0, 3);
		assert!(bucket.try_acquire());
		assert!(bucket.try_acquire());
		assert!(bucket.try_acquire());
		assert!(!bucket.try_acquire());
	}

	#[test]
	fn available_reports_current_tokens() {
		let bucket = TokenBucket::new(5.0, 10);
		assert!((bucket.available() - 10.0).abs() < 1e-9);
		bucket.try_acquire();
		assert!((bucket.available() - 9.0).abs() < 1e-6);
	}

	#[tokio::test(start_paused = true)]
	async fn acquire_blocks_until_refill() {
		let bucket = TokenBucket::new(2.0, 1);
		assert!(bucket.try_acquire());
		assert!(!bucket.try_acquire());
		let acquired = bucket.acquire(Some(Duration::from_secs(5))).await;
		assert!(acquired);
	}

	#[tokio::test(start_paused = true)]
	async fn acquire_times_out_when_deadline_too_short() {
		let bucket = TokenBucket::new(0.1, 1);
		assert!(bucket.try_acquire());
		let acquired = bucket.acquire(Some(Duration::from_millis(50))).await;
		assert!(!acquired);
	}
}
