//! §4.4 HTTP Transport. A single pooled `reqwest::Client` shared by every
//! provider client, with the exact status/body-sniff → `TypedError` mapping
//! table, grounded in `proxy/mod.rs`'s `ProxyError::into_response` dispatch
//! and `client/mod.rs`'s pooled `Connector` (replaced here by `reqwest`
//! since we are not a service-mesh sidecar).

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::error::TypedError;

const SNIFF_WINDOW: usize = 2048;
const RATE_LIMIT_MARKERS: &[&str] = &["quota", "api key", "rate limit", "per key"];

pub struct HttpTransport {
	client: Client,
}

impl HttpTransport {
	/// `proxy` is a `socks5://host:port` URL, populated only when Hysteria2
	/// is the active tunnel (§3 `TunnelDescriptor::hysteria2`).
	pub fn new(proxy: Option<String>) -> anyhow::Result<Self> {
		let mut builder = Client::builder()
			.pool_max_idle_per_host(20)
			.pool_idle_timeout(Duration::from_secs(90))
			.redirect(reqwest::redirect::Policy::limited(10))
			.use_rustls_tls();
		if let Some(proxy) = proxy {
			builder = builder.proxy(reqwest::Proxy::all(&proxy)?);
		}
		Ok(Self { client: builder.build()? })
	}

	/// §4.4 `Request(method, url, headers, body, timeout) -> (jsonObject, Error)`.
	pub async fn request_json(
		&self,
		method: Method,
		url: &str,
		headers: http::HeaderMap,
		body: Option<Value>,
		timeout: Duration,
	) -> Result<Value, TypedError> {
		let mut req = self.client.request(method, url).headers(headers).timeout(timeout);
		if let Some(body) = body {
			req = req.json(&body);
		}

		let resp = req.send().await.map_err(classify_send_error)?;
		let status = resp.status();
		let headers = resp.headers().clone();
		let text = resp.text().await.map_err(|_| TypedError::NetworkError("body read failed".into()))?;

		classify_status(status, &headers, &text)
	}
}

fn classify_send_error(err: reqwest::Error) -> TypedError {
	if err.is_timeout() {
		TypedError::Timeout
	} else {
		TypedError::NetworkError(err.to_string())
	}
}

/// §4.4 error-mapping table. Separated from the network call so unit tests
/// can exercise it against literal status/body fixtures (§8 "Body-sniff
/// monotone" law).
fn classify_status(status: StatusCode, headers: &http::HeaderMap, body: &str) -> Result<Value, TypedError> {
	let code = status.as_u16();
	match code {
		401 | 403 => Err(TypedError::AuthError),
		429 => {
			let cutoff = body.char_indices().map(|(i, _)| i).find(|i| *i >= SNIFF_WINDOW).unwrap_or(body.len());
			let sniff_window = &body[..cutoff];
			let lowered = sniff_window.to_ascii_lowercase();
			if RATE_LIMIT_MARKERS.iter().any(|m| lowered.contains(m)) {
				Err(TypedError::RateLimited {
					retry_after: retry_after_seconds(headers),
				})
			} else {
				Err(TypedError::ServiceOverload { status: 429 })
			}
		}
		503 => Err(TypedError::ServiceOverload { status: 503 }),
		500..=599 => Err(TypedError::ServerError { status: code }),
		400..=499 => Err(TypedError::ValidationError),
		200..=299 => serde_json::from_str(body).map_err(|_| TypedError::ValidationError),
		_ => Err(TypedError::ValidationError),
	}
}

fn retry_after_seconds(headers: &http::HeaderMap) -> Option<u64> {
	headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn status(code: u16) -> StatusCode {
		StatusCode::from_u16(code).unwrap()
	}

	#[test]
	fn rate_limited_body_sniff_is_case_insensitive() {
		let headers = http::HeaderMap::new();
		let err = classify_status(status(429), &headers, "Quota Exceeded for this key").unwrap_err();
		assert!(matches!(err, TypedError::RateLimited { .. }));
	}

	#[test]
	fn non_matching_429_body_is_service_overload() {
		let headers = http::HeaderMap::new();
		let err = classify_status(status(429), &headers, "The service is temporarily unavailable").unwrap_err();
		assert_eq!(err, TypedError::ServiceOverload { status: 429 });
	}

	#[test]
	fn retry_after_header_is_parsed_when_numeric() {
		let mut headers = http::HeaderMap::new();
		headers.insert(http::header::RETRY_AFTER, "12".parse().unwrap());
		let err = classify_status(status(429), &headers, "rate limit hit").unwrap_err();
		assert_eq!(err, TypedError::RateLimited { retry_after: Some(12) });
	}

	#[test]
	fn service_unavailable_maps_to_overload() {
		let headers = http::HeaderMap::new();
		let err = classify_status(status(503), &headers, "").unwrap_err();
		assert_eq!(err, TypedError::ServiceOverload { status: 503 });
	}

	#[test]
	fn other_5xx_maps_to_server_error() {
		let headers = http::HeaderMap::new();
		let err = classify_status(status(502), &headers, "").unwrap_err();
		assert_eq!(err, TypedError::ServerError { status: 502 });
	}

	#[test]
	fn success_with_non_json_body_is_validation_error() {
		let headers = http::HeaderMap::new();
		let err = classify_status(status(200), &headers, "not json").unwrap_err();
		assert_eq!(err, TypedError::ValidationError);
	}

	#[test]
	fn sniff_window_does_not_panic_on_multibyte_boundary() {
		let headers = http::HeaderMap::new();
		let mut body = "a".repeat(SNIFF_WINDOW - 1);
		body.push('€'); // 3-byte UTF-8 char straddling the sniff window cutoff
		body.push_str("quota exceeded");
		let err = classify_status(status(429), &headers, &body).unwrap_err();
		assert!(matches!(err, TypedError::ServiceOverload { .. } | TypedError::RateLimited { .. }));
	}

	#[test]
	fn success_with_json_body_parses() {
		let headers = http::HeaderMap::new();
		let value = classify_status(status(200), &headers, r#"{"ok":true}"#).unwrap();
		assert_eq!(value["ok"], Value::Bool(true));
	}
}
