//! §4.5 Provider Client and the provider-agnostic data model (§3
//! `RequestFingerprint`/`Response`). One [`ProviderClient`] wraps a single
//! `(provider, key)` pair; §4.6's pool client holds one per key and rotates
//! across them.
//!
//! The per-provider wire shape lives behind the [`Provider`] trait (§9:
//! "tagged-variant ... with a small interface"), mirroring how
//! `llm/gemini.rs` implements `super::Provider` for the teacher's own
//! `AIProvider` dispatch in `llm/mod.rs`.

pub mod gemini;
pub mod openrouter;

use std::time::Duration;

use http::{HeaderMap, Method};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::TypedError;
use crate::keypool::Key;
use crate::transport::HttpTransport;

/// §3 `RequestFingerprint`. Immutable once built.
#[derive(Clone)]
pub struct RequestFingerprint {
	pub method: CallMethod,
	pub prompt: String,
	pub system_instructions: Option<String>,
	pub image: Option<ImageInput>,
	pub response_mime: Option<String>,
	pub timeout: Duration,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallMethod {
	Text,
	Vision,
}

#[derive(Clone)]
pub struct ImageInput {
	pub bytes: Vec<u8>,
	pub mime: String,
}

/// §3 `Response`: the raw JSON body plus a provider-aware `text()` accessor.
pub struct Response {
	pub raw: Value,
	provider: ProviderKind,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProviderKind {
	GeminiV1Beta,
	OpenRouterV1,
}

impl Response {
	pub fn new(raw: Value, provider: ProviderKind) -> Self {
		Self { raw, provider }
	}

	/// §3: Gemini `candidates[0].content.parts[0].text`; OpenRouter
	/// `choices[0].message.content`.
	pub fn text(&self) -> Option<&str> {
		match self.provider {
			ProviderKind::GeminiV1Beta => self.raw["candidates"][0]["content"]["parts"][0]["text"].as_str(),
			ProviderKind::OpenRouterV1 => self.raw["choices"][0]["message"]["content"].as_str(),
		}
	}
}

/// A built HTTP request, ready for [`HttpTransport::request_json`].
pub struct BuiltRequest {
	pub method: Method,
	pub url: String,
	pub headers: HeaderMap,
	pub body: Option<Value>,
}

/// §9's provider interface: `BuildText`, `BuildVision`, `ParseResponse` is
/// folded into [`Response::text`] since parsing only needs the tag.
pub trait Provider: Send + Sync {
	const KIND: ProviderKind;

	fn build_text(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest;
	fn build_vision(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest;

	fn build(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest {
		match fp.method {
			CallMethod::Text => self.build_text(key, fp),
			CallMethod::Vision => self.build_vision(key, fp),
		}
	}
}

/// §4.5: one client per `(provider, key)`, owning the local retry loop.
pub struct ProviderClient<P: Provider> {
	provider: P,
	transport: std::sync::Arc<HttpTransport>,
	max_retries: u32,
}

impl<P: Provider> ProviderClient<P> {
	pub fn new(provider: P, transport: std::sync::Arc<HttpTransport>, max_retries: u32) -> Self {
		Self {
			provider,
			transport,
			max_retries: max_retries.max(1),
		}
	}

	/// §4.5 local retry loop. When wrapped by the pool client, callers pass
	/// `max_retries = 1` so cross-key rotation (§4.6) is what delivers
	/// resilience; used standalone, this loop alone retries.
	pub async fn call(&self, key: &Key, fp: &RequestFingerprint) -> Result<Response, TypedError> {
		let mut attempt = 0u32;
		let mut last_err;
		loop {
			attempt += 1;
			let built = self.provider.build(key, fp);
			let result = self
				.transport
				.request_json(built.method, &built.url, built.headers, built.body, fp.timeout)
				.await;

			match result {
				Ok(json) => return Ok(Response::new(json, P::KIND)),
				Err(err) => {
					last_err = err.clone();
					if attempt >= self.max_retries || !err.is_retryable() {
						return Err(last_err);
					}
					let sleep = retry_delay(&err, attempt);
					tracing::warn!(attempt, delay_secs = sleep.as_secs(), provider = ?P::KIND, "provider client retrying");
					tokio::time::sleep(sleep).await;
				}
			}
		}
	}
}

/// §4.5: RateLimited sleeps `retryAfter` or `2^attempt`; ServiceOverload
/// sleeps a fixed 30s; ServerError/Timeout use exponential backoff.
fn retry_delay(err: &TypedError, attempt: u32) -> Duration {
	match err {
		TypedError::RateLimited { retry_after: Some(s) } => Duration::from_secs(*s),
		TypedError::RateLimited { retry_after: None } => Duration::from_secs(2u64.saturating_pow(attempt)),
		TypedError::ServiceOverload { .. } => crate::error::SERVICE_OVERLOAD_SLEEP,
		_ => Duration::from_secs(2u64.saturating_pow(attempt)),
	}
}

/// Builds a `ProviderClient` for whichever provider `cfg` names.
pub enum AnyProviderClient {
	Gemini(ProviderClient<gemini::GeminiProvider>),
	OpenRouter(ProviderClient<openrouter::OpenRouterProvider>),
}

impl AnyProviderClient {
	pub fn new_gemini(cfg: &ProviderConfig, transport: std::sync::Arc<HttpTransport>, max_retries: u32) -> Self {
		AnyProviderClient::Gemini(ProviderClient::new(gemini::GeminiProvider::new(cfg), transport, max_retries))
	}

	pub fn new_openrouter(cfg: &ProviderConfig, transport: std::sync::Arc<HttpTransport>, max_retries: u32) -> Self {
		AnyProviderClient::OpenRouter(ProviderClient::new(openrouter::OpenRouterProvider::new(cfg), transport, max_retries))
	}

	pub async fn call(&self, key: &Key, fp: &RequestFingerprint) -> Result<Response, TypedError> {
		match self {
			AnyProviderClient::Gemini(c) => c.call(key, fp).await,
			AnyProviderClient::OpenRouter(c) => c.call(key, fp).await,
		}
	}
}
