//! §4.6 Pool Client: the orchestrator tying C1-C5 together. Grounded in
//! `openrouter_pool.py`'s `_select_key`/`_execute_with_pool` — the retry/
//! rotation dispatch below mirrors that method's per-error-variant handling
//! line for line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{GatewayError, TypedError, SERVICE_OVERLOAD_SLEEP};
use crate::keypool::{KeyPool, KeyStateSnapshot};
use crate::llm::{AnyProviderClient, RequestFingerprint, Response};
use crate::transport::HttpTransport;

/// §C (SPEC_FULL Open Questions): how many times `record_failure` fires on a
/// single `RateLimited` response, fast-tracking the key's breaker to Open.
const RATE_LIMIT_FAILURE_WEIGHT: u32 = 3;

/// §4.6 step 2's fallback sleep when no key clears selection on this pass.
const NO_KEY_AVAILABLE_SLEEP: Duration = Duration::from_secs(1);

/// §8 scenario 4's `maxRetries=3`: retries *after* the first attempt, within
/// the pool's own rotation loop (distinct from the provider client's internal
/// retry count, which the pool always pins to 1 — see `PoolClient::new`). A
/// single key therefore gets up to 4 total attempts before the pool gives up.
const DEFAULT_PER_KEY_MAX_RETRIES: u32 = 3;

pub struct PoolStats {
	pub keys: Vec<KeyStateSnapshot>,
}

/// The selection critical section (§4.6 invariant: "at most one selection
/// critical section at a time; the HTTP call itself runs without holding the
/// selection lock").
struct SelectionLock;

#[derive(Clone)]
pub struct PoolClient {
	pool: Arc<KeyPool>,
	provider_client: Arc<AnyProviderClient>,
	selection_lock: Arc<Mutex<SelectionLock>>,
	per_key_max_retries: u32,
}

impl PoolClient {
	pub fn new(cfg: &Config, transport: HttpTransport) -> anyhow::Result<Self> {
		let provider_cfg = cfg.active_provider();
		let transport = Arc::new(transport);
		let pool = Arc::new(KeyPool::new(
			provider_cfg.api_keys.clone(),
			provider_cfg.qps_per_key,
			provider_cfg.burst_size(),
			provider_cfg.strategy,
		)?);

		// The pool controls cross-key rotation (§4.5 "Decision"), so the
		// provider client's own retry loop is disabled (max_retries = 1).
		let provider_client = Arc::new(match cfg.ai_provider {
			crate::config::AiProvider::Gemini => AnyProviderClient::new_gemini(provider_cfg, transport, 1),
			crate::config::AiProvider::OpenRouter => AnyProviderClient::new_openrouter(provider_cfg, transport, 1),
		});

		Ok(Self {
			pool,
			provider_client,
			selection_lock: Arc::new(Mutex::new(SelectionLock)),
			per_key_max_retries: DEFAULT_PER_KEY_MAX_RETRIES,
		})
	}

	pub fn stats(&self) -> PoolStats {
		PoolStats { keys: self.pool.stats() }
	}

	/// §4.6 `Call(fingerprint) -> Response | TypedError`.
	pub async fn call(&self, fp: RequestFingerprint) -> Result<Response, GatewayError> {
		let max_attempts = self.pool.len() as u32 * (self.per_key_max_retries.max(1) + 1);
		let mut last_err: Option<TypedError> = None;

		for attempt in 0..max_attempts {
			let key = self.select_key().await;
			let breaker = self.pool.breaker(&key);
			let started = Instant::now();

			match self.provider_client.call(&key, &fp).await {
				Ok(response) => {
					breaker.record_success();
					self.pool.record_success(&key, started.elapsed());
					return Ok(response);
				}
				Err(err @ TypedError::RateLimited { retry_after }) => {
					for _ in 0..RATE_LIMIT_FAILURE_WEIGHT {
						breaker.record_failure();
					}
					self.pool.record_failure(&key, err.status_code());
					let delay = retry_after.map(Duration::from_secs).unwrap_or(SERVICE_OVERLOAD_SLEEP).min(Duration::from_secs(30));
					tracing::warn!(key = %key.redacted(), delay_secs = delay.as_secs(), "rate limited, rotating");
					last_err = Some(err);
					tokio::time::sleep(delay).await;
				}
				Err(err @ TypedError::ServiceOverload { .. }) => {
					// Not the key's fault: breaker untouched.
					self.pool.record_failure(&key, err.status_code());
					tracing::warn!(key = %key.redacted(), "service overload, waiting 30s");
					last_err = Some(err);
					tokio::time::sleep(SERVICE_OVERLOAD_SLEEP).await;
				}
				Err(err @ (TypedError::ServerError { .. } | TypedError::Timeout)) => {
					breaker.record_failure();
					self.pool.record_failure(&key, err.status_code());
					let delay = Duration::from_secs(1 << attempt.min(5));
					tracing::warn!(key = %key.redacted(), delay_secs = delay.as_secs(), "transient error, backing off");
					last_err = Some(err);
					tokio::time::sleep(delay).await;
				}
				Err(err @ (TypedError::AuthError | TypedError::ValidationError)) => {
					self.pool.record_failure(&key, err.status_code());
					return Err(GatewayError::Typed(err));
				}
				Err(err @ TypedError::NetworkError(_)) => {
					breaker.record_failure();
					self.pool.record_failure(&key, None);
					last_err = Some(err);
				}
			}
		}

		Err(GatewayError::AllKeysExhausted {
			last: last_err.unwrap_or(TypedError::NetworkError("no attempts made".into())),
		})
	}

	/// §4.6 step 2: select a key whose breaker admits traffic and whose
	/// limiter has a free token; if none clears on one pass, sleep 1s and
	/// re-enter selection rather than dispatch to a possibly-Open key
	/// (documented alternative, see SPEC_FULL §C).
	async fn select_key(&self) -> crate::keypool::Key {
		loop {
			let candidate = {
				let _guard = self.selection_lock.lock();
				let mut found = None;
				for _ in 0..self.pool.len() {
					let key = self.pool.next_key().clone();
					let breaker = self.pool.breaker(&key);
					if !breaker.admit() {
						continue;
					}
					if self.pool.bucket(&key).try_acquire() {
						found = Some(key);
						break;
					}
					// admit() may have claimed this key's single HalfOpen probe
					// slot; since we aren't dispatching to it after all, give
					// the slot back so the key isn't stuck HalfOpen forever.
					breaker.release_probe();
				}
				found
			};
			if let Some(key) = candidate {
				return key;
			}
			tokio::time::sleep(NO_KEY_AVAILABLE_SLEEP).await;
		}
	}
}
