//! §3 `Key`/`KeyState` and §4.3 Key Pool. Grounded in the original's
//! `KeyPool`/per-key bookkeeping referenced from `openrouter_pool.py`
//! (`_select_key`, `get_pool_stats`), translated into atomics-backed state
//! the way `agentgateway` keeps per-route counters.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::bail;

use crate::breaker::CircuitBreaker;
use crate::ratelimit::TokenBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
	RoundRobin,
	LeastBusy,
}

impl FromStr for SelectionStrategy {
	type Err = anyhow::Error;
	fn from_str(s: &str) -> anyhow::Result<Self> {
		match s.to_ascii_uppercase().as_str() {
			"ROUND_ROBIN" => Ok(SelectionStrategy::RoundRobin),
			"LEAST_BUSY" => Ok(SelectionStrategy::LeastBusy),
			other => bail!("unknown key selection strategy {other:?}"),
		}
	}
}

/// §3 `Key`: identity is suffix-redacted for logging, never the full secret.
#[derive(Clone)]
pub struct Key {
	pub secret: String,
	pub index: usize,
}

impl Key {
	/// §B.6: last 8 characters, used in every log line that references a key.
	pub fn redacted(&self) -> String {
		let s = &self.secret;
		if s.len() <= 8 {
			format!("...{s}")
		} else {
			format!("...{}", &s[s.len() - 8..])
		}
	}
}

/// §3 `KeyState` counters, minus `tokens`/`breakerState` which live in the
/// adjacent [`TokenBucket`]/[`CircuitBreaker`] to keep each concern's
/// invariants enforced by its own type.
#[derive(Default)]
struct Counters {
	total_requests: AtomicU64,
	total_successes: AtomicU64,
	total_failures: AtomicU64,
	total_latency_nanos: AtomicU64,
	per_status: Mutex<HashMap<u16, u64>>,
}

pub struct KeyStateSnapshot {
	pub key_suffix: String,
	pub breaker_state: crate::breaker::BreakerState,
	pub tokens_available: f64,
	pub total_requests: u64,
	pub total_successes: u64,
	pub total_failures: u64,
	pub total_latency_nanos: u64,
	pub per_status_counts: HashMap<u16, u64>,
}

struct Entry {
	key: Key,
	bucket: TokenBucket,
	breaker: CircuitBreaker,
	counters: Counters,
}

/// §4.3: immutable key list plus per-key runtime state, selection cursor.
pub struct KeyPool {
	entries: Vec<Entry>,
	strategy: SelectionStrategy,
	cursor: AtomicU64,
}

impl KeyPool {
	pub fn new(keys: Vec<String>, qps_per_key: f64, burst_size: u32, strategy: SelectionStrategy) -> anyhow::Result<Self> {
		if keys.is_empty() {
			bail!("key pool requires at least one API key");
		}
		let entries = keys
			.into_iter()
			.enumerate()
			.map(|(index, secret)| Entry {
				key: Key { secret, index },
				bucket: TokenBucket::new(qps_per_key, burst_size),
				breaker: CircuitBreaker::with_defaults(),
				counters: Counters::default(),
			})
			.collect();
		Ok(Self {
			entries,
			strategy,
			cursor: AtomicU64::new(0),
		})
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn next_index(&self) -> usize {
		match self.strategy {
			SelectionStrategy::RoundRobin => (self.cursor.fetch_add(1, Ordering::Relaxed) as usize) % self.entries.len(),
			SelectionStrategy::LeastBusy => {
				let start = (self.cursor.fetch_add(1, Ordering::Relaxed) as usize) % self.entries.len();
				let mut best = start;
				let mut best_inflight = self.inflight(start);
				for offset in 1..self.entries.len() {
					let i = (start + offset) % self.entries.len();
					let inflight = self.inflight(i);
					if inflight < best_inflight {
						best = i;
						best_inflight = inflight;
					}
				}
				best
			}
		}
	}

	fn inflight(&self, i: usize) -> u64 {
		let c = &self.entries[i].counters;
		let total = c.total_requests.load(Ordering::Relaxed);
		let done = c.total_successes.load(Ordering::Relaxed) + c.total_failures.load(Ordering::Relaxed);
		total.saturating_sub(done)
	}

	/// §4.3 `Next`: the bare selection-strategy cursor, gating is the caller's
	/// job (§4.6 step 2).
	pub fn next_key(&self) -> &Key {
		let i = self.next_index();
		&self.entries[i].key
	}

	pub fn breaker(&self, key: &Key) -> &CircuitBreaker {
		&self.entries[key.index].breaker
	}

	pub fn bucket(&self, key: &Key) -> &TokenBucket {
		&self.entries[key.index].bucket
	}

	pub fn record_success(&self, key: &Key, latency: Duration) {
		let c = &self.entries[key.index].counters;
		c.total_requests.fetch_add(1, Ordering::Relaxed);
		c.total_successes.fetch_add(1, Ordering::Relaxed);
		c.total_latency_nanos.fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
	}

	pub fn record_failure(&self, key: &Key, status: Option<u16>) {
		let c = &self.entries[key.index].counters;
		c.total_requests.fetch_add(1, Ordering::Relaxed);
		c.total_failures.fetch_add(1, Ordering::Relaxed);
		if let Some(status) = status {
			*c.per_status.lock().unwrap().entry(status).or_insert(0) += 1;
		}
	}

	pub fn stats(&self) -> Vec<KeyStateSnapshot> {
		self.entries
			.iter()
			.map(|e| KeyStateSnapshot {
				key_suffix: e.key.redacted(),
				breaker_state: e.breaker.state(),
				tokens_available: e.bucket.available(),
				total_requests: e.counters.total_requests.load(Ordering::Relaxed),
				total_successes: e.counters.total_successes.load(Ordering::Relaxed),
				total_failures: e.counters.total_failures.load(Ordering::Relaxed),
				total_latency_nanos: e.counters.total_latency_nanos.load(Ordering::Relaxed),
				per_status_counts: e.counters.per_status.lock().unwrap().clone(),
			})
			.collect()
	}

	pub fn keys(&self) -> impl Iterator<Item = &Key> {
		self.entries.iter().map(|e| &e.key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool(n: usize, strategy: SelectionStrategy) -> KeyPool {
		let keys = (0..n).map(|i| format!("key-{i:08}")).collect();
		KeyPool::new(keys, 100.0, 100, strategy).unwrap()
	}

	#[test]
	fn round_robin_is_deterministic() {
		let pool = pool(3, SelectionStrategy::RoundRobin);
		let seq: Vec<usize> = (0..6).map(|_| pool.next_key().index).collect();
		assert_eq!(seq, vec![0, 1, 2, 0, 1, 2]);
	}

	#[test]
	fn invariant_successes_plus_failures_le_requests() {
		let pool = pool(2, SelectionStrategy::RoundRobin);
		let k = pool.next_key().clone();
		pool.record_success(&k, Duration::from_millis(5));
		pool.record_failure(&k, Some(500));
		let snap = pool.stats().into_iter().find(|s| s.key_suffix == k.redacted()).unwrap();
		assert!(snap.total_successes + snap.total_failures <= snap.total_requests);
	}

	#[test]
	fn redacted_shows_only_last_eight_chars() {
		let keys = vec!["sk-abcdefghijklmnop".to_string()];
		let pool = KeyPool::new(keys, 1.0, 1, SelectionStrategy::RoundRobin).unwrap();
		assert_eq!(pool.next_key().redacted(), "...ijklmnop");
	}
}
