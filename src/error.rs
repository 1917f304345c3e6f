//! Error taxonomy shared by the HTTP transport, provider clients, the pool
//! client, and the VPN controller. Mirrors `agentgateway`'s `ProxyError` /
//! `AIError` shape: one `thiserror` enum per layer, each with a retry-policy
//! predicate the layer above consults instead of re-deriving it from status
//! codes.

use std::time::Duration;

use thiserror::Error;

/// §3 `TypedError`. Produced by [`crate::transport::HttpTransport`], consumed
/// by the provider client's retry loop and the pool client's dispatch table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypedError {
	#[error("rate limited{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
	RateLimited { retry_after: Option<u64> },

	#[error("service overload ({status})")]
	ServiceOverload { status: u16 },

	#[error("server error ({status})")]
	ServerError { status: u16 },

	#[error("request timed out")]
	Timeout,

	#[error("authentication failed")]
	AuthError,

	#[error("request validation failed")]
	ValidationError,

	#[error("network error: {0}")]
	NetworkError(String),
}

impl TypedError {
	/// §3: "only the first four are retryable" (RateLimited, ServiceOverload,
	/// ServerError, Timeout).
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			TypedError::RateLimited { .. } | TypedError::ServiceOverload { .. } | TypedError::ServerError { .. } | TypedError::Timeout
		)
	}

	/// Status code associated with this error, for `perStatusCounts` bookkeeping.
	pub fn status_code(&self) -> Option<u16> {
		match self {
			TypedError::RateLimited { .. } => Some(429),
			TypedError::ServiceOverload { status } => Some(*status),
			TypedError::ServerError { status } => Some(*status),
			TypedError::AuthError => Some(401),
			TypedError::ValidationError => Some(422),
			TypedError::Timeout | TypedError::NetworkError(_) => None,
		}
	}
}

/// §4.6 step 5: `AllKeysExhausted` — a distinct tag wrapping the last
/// per-key `TypedError` seen by the pool client.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
	#[error("all keys exhausted, last error: {last}")]
	AllKeysExhausted { last: TypedError },

	#[error(transparent)]
	Typed(#[from] TypedError),

	#[error("call cancelled")]
	Cancelled,
}

/// User-visible failure shape from §7: "structured `{kind, message, status?,
/// retryAfterSeconds?, keyIdSuffix?}` objects, never free text".
#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureView {
	pub kind: &'static str,
	pub message: String,
	pub status: Option<u16>,
	pub retry_after_seconds: Option<u64>,
	pub key_id_suffix: Option<String>,
}

impl GatewayError {
	pub fn to_view(&self, key_id_suffix: Option<String>) -> FailureView {
		let (kind, status, retry_after_seconds) = match self {
			GatewayError::AllKeysExhausted { last } => ("all_keys_exhausted", last.status_code(), retry_after_of(last)),
			GatewayError::Typed(e) => (typed_kind(e), e.status_code(), retry_after_of(e)),
			GatewayError::Cancelled => ("cancelled", None, None),
		};
		FailureView {
			kind,
			message: self.to_string(),
			status,
			retry_after_seconds,
			key_id_suffix,
		}
	}
}

fn typed_kind(e: &TypedError) -> &'static str {
	match e {
		TypedError::RateLimited { .. } => "rate_limited",
		TypedError::ServiceOverload { .. } => "service_overload",
		TypedError::ServerError { .. } => "server_error",
		TypedError::Timeout => "timeout",
		TypedError::AuthError => "auth_error",
		TypedError::ValidationError => "validation_error",
		TypedError::NetworkError(_) => "network_error",
	}
}

fn retry_after_of(e: &TypedError) -> Option<u64> {
	match e {
		TypedError::RateLimited { retry_after } => *retry_after,
		_ => None,
	}
}

/// Default sleep the pool client uses for `ServiceOverload` (§4.6: "sleep 30s").
pub const SERVICE_OVERLOAD_SLEEP: Duration = Duration::from_secs(30);
