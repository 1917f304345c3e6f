//! §4.2 three-state circuit breaker. One instance per key, held by
//! [`crate::keypool::KeyPool`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

struct Inner {
	state: BreakerState,
	consecutive_failures: u32,
	opened_at: Option<Instant>,
	/// Set while a HalfOpen probe is in flight, so only one caller is admitted
	/// per open period (§4.2: "admit next request; re-deny further requests
	/// until the in-flight one reports").
	probe_in_flight: bool,
}

pub struct CircuitBreaker {
	failure_threshold: u32,
	recovery_timeout: Duration,
	inner: Mutex<Inner>,
}

impl CircuitBreaker {
	pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
		Self {
			failure_threshold,
			recovery_timeout,
			inner: Mutex::new(Inner {
				state: BreakerState::Closed,
				consecutive_failures: 0,
				opened_at: None,
				probe_in_flight: false,
			}),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(5, Duration::from_secs(60))
	}

	/// Returns whether a call may be dispatched right now. Performs the
	/// opportunistic `Open -> HalfOpen` transition and, if it does, claims the
	/// single HalfOpen probe slot for the caller.
	pub fn admit(&self) -> bool {
		let mut inner = self.inner.lock().unwrap();
		match inner.state {
			BreakerState::Closed => true,
			BreakerState::Open => {
				let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
				if elapsed >= self.recovery_timeout {
					inner.state = BreakerState::HalfOpen;
					inner.probe_in_flight = true;
					true
				} else {
					false
				}
			}
			BreakerState::HalfOpen => {
				if inner.probe_in_flight {
					false
				} else {
					inner.probe_in_flight = true;
					true
				}
			}
		}
	}

	/// Releases a HalfOpen probe slot claimed by `admit()` without being used
	/// (e.g. the caller lost the race for a rate-limit token afterward). A
	/// no-op outside HalfOpen, so callers can invoke it unconditionally.
	pub fn release_probe(&self) {
		let mut inner = self.inner.lock().unwrap();
		if inner.state == BreakerState::HalfOpen {
			inner.probe_in_flight = false;
		}
	}

	pub fn state(&self) -> BreakerState {
		let mut inner = self.inner.lock().unwrap();
		if inner.state == BreakerState::Open {
			let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
			if elapsed >= self.recovery_timeout {
				inner.state = BreakerState::HalfOpen;
			}
		}
		inner.state
	}

	pub fn record_success(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.state = BreakerState::Closed;
		inner.consecutive_failures = 0;
		inner.opened_at = None;
		inner.probe_in_flight = false;
	}

	pub fn record_failure(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.probe_in_flight = false;
		match inner.state {
			BreakerState::HalfOpen => {
				inner.state = BreakerState::Open;
				inner.opened_at = Some(Instant::now());
			}
			BreakerState::Closed | BreakerState::Open => {
				inner.consecutive_failures += 1;
				if inner.consecutive_failures >= self.failure_threshold {
					inner.state = BreakerState::Open;
					inner.opened_at = Some(Instant::now());
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opens_after_threshold_failures() {
		let cb = CircuitBreaker::new(3, Duration::from_secs(60));
		cb.record_failure();
		cb.record_failure();
		assert_eq!(cb.state(), BreakerState::Closed);
		cb.record_failure();
		assert_eq!(cb.state(), BreakerState::Open);
		assert!(!cb.admit());
	}

	#[test]
	fn success_resets_consecutive_failures() {
		let cb = CircuitBreaker::new(3, Duration::from_secs(60));
		cb.record_failure();
		cb.record_failure();
		cb.record_success();
		cb.record_failure();
		cb.record_failure();
		assert_eq!(cb.state(), BreakerState::Closed);
	}

	#[test]
	fn half_open_admits_single_probe() {
		let cb = CircuitBreaker::new(1, Duration::from_millis(0));
		cb.record_failure();
		assert_eq!(cb.state(), BreakerState::Open);
		assert!(cb.admit());
		assert_eq!(cb.state(), BreakerState::HalfOpen);
		assert!(!cb.admit());
	}

	#[test]
	fn half_open_failure_reopens() {
		let cb = CircuitBreaker::new(1, Duration::from_millis(0));
		cb.record_failure();
		assert!(cb.admit());
		cb.record_failure();
		assert_eq!(cb.state(), BreakerState::Open);
	}

	#[test]
	fn half_open_success_closes() {
		let cb = CircuitBreaker::new(1, Duration::from_millis(0));
		cb.record_failure();
		assert!(cb.admit());
		cb.record_success();
		assert_eq!(cb.state(), BreakerState::Closed);
	}

	#[test]
	fn releasing_an_unused_probe_frees_it_for_the_next_admit() {
		let cb = CircuitBreaker::new(1, Duration::from_millis(0));
		cb.record_failure();
		assert!(cb.admit());
		assert!(!cb.admit(), "probe slot should be claimed");
		cb.release_probe();
		assert!(cb.admit(), "releasing the unused probe should free the slot again");
	}

	#[test]
	fn releasing_a_probe_outside_half_open_is_a_no_op() {
		let cb = CircuitBreaker::new(3, Duration::from_secs(60));
		cb.release_probe();
		assert_eq!(cb.state(), BreakerState::Closed);
		assert!(cb.admit());
	}
}
