//! End-to-end pool-client scenarios against a stub HTTP server, covering the
//! literal §8 cases: one key quota-exhausted among three (1), same-key
//! recovery after a service-overload response (2), an auth error
//! short-circuiting the whole pool (3), and exponential backoff across
//! repeated timeouts on a single key (4).

use std::time::Duration;

use gateway_core::config::{AiProvider, Config, ProviderConfig};
use gateway_core::keypool::SelectionStrategy;
use gateway_core::llm::{CallMethod, RequestFingerprint};
use gateway_core::transport::HttpTransport;
use gateway_core::PoolClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fingerprint() -> RequestFingerprint {
	RequestFingerprint {
		method: CallMethod::Text,
		prompt: "hello".to_string(),
		system_instructions: None,
		image: None,
		response_mime: None,
		timeout: Duration::from_secs(5),
	}
}

fn openrouter_config(keys: Vec<&str>, base_url: String) -> Config {
	Config {
		ai_provider: AiProvider::OpenRouter,
		gemini: None,
		openrouter: Some(ProviderConfig {
			api_keys: keys.into_iter().map(String::from).collect(),
			model_text: "openrouter/auto".to_string(),
			model_vision: "openrouter/auto".to_string(),
			timeout: Duration::from_secs(5),
			qps_per_key: 100.0,
			burst_multiplier: 1.0,
			strategy: SelectionStrategy::RoundRobin,
			base_url: Some(base_url),
			app_url: None,
			app_name: None,
		}),
		vpn: None,
	}
}

/// §8 scenario 1: three keys, round-robin, one quota-exhausted. The first
/// key to be tried (A) returns 429 with a quota-exceeded body; the pool
/// rotates and a later key succeeds. A `Retry-After: 1` header keeps the
/// pool's mandated post-failure sleep short enough for a test to run.
#[tokio::test]
async fn three_keys_one_quota_exhausted() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(
			ResponseTemplate::new(429)
				.set_body_string("quota exceeded for this key")
				.append_header("Retry-After", "1"),
		)
		.up_to_n_times(1)
		.with_priority(1)
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"choices": [{ "message": { "content": "ok" } }],
		})))
		.with_priority(2)
		.mount(&server)
		.await;

	let cfg = openrouter_config(vec!["key-a", "key-b", "key-c"], server.uri());
	let transport = HttpTransport::new(None).unwrap();
	let client = PoolClient::new(&cfg, transport).unwrap();

	let response = client.call(fingerprint()).await.expect("call should eventually succeed");
	assert_eq!(response.text(), Some("ok"));

	let stats = client.stats();
	let total_successes: u64 = stats.keys.iter().map(|k| k.total_successes).sum();
	let total_failures: u64 = stats.keys.iter().map(|k| k.total_failures).sum();
	assert_eq!(total_successes, 1, "exactly one key should have succeeded");
	assert!(total_failures >= 1, "the quota-exhausted key should have recorded a failure");
}

/// §8 scenario 2: a single-key pool where the first call reports the service
/// overloaded (not the key's fault) and the second call, on the same key,
/// succeeds. The pool's fixed 30 s overload sleep runs against a paused
/// clock so the test doesn't actually wait 30 s; wiremock's own responses
/// still go over a real loopback connection.
#[tokio::test(start_paused = true)]
async fn service_overload_retries_same_key_to_success() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(429).set_body_string("The service is temporarily unavailable"))
		.up_to_n_times(1)
		.with_priority(1)
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"choices": [{ "message": { "content": "ok" } }],
		})))
		.with_priority(2)
		.mount(&server)
		.await;

	let cfg = openrouter_config(vec!["key-a"], server.uri());
	let transport = HttpTransport::new(None).unwrap();
	let client = PoolClient::new(&cfg, transport).unwrap();

	let response = client.call(fingerprint()).await.expect("call should succeed on the retry");
	assert_eq!(response.text(), Some("ok"));

	let stats = client.stats();
	assert_eq!(stats.keys.len(), 1);
	assert_eq!(stats.keys[0].total_requests, 2, "exactly two attempts against the single key");
	assert_eq!(stats.keys[0].total_successes, 1);
	assert_eq!(stats.keys[0].total_failures, 1, "the overload response must not be swallowed");
}

/// §8 scenario 4: a single-key pool that times out three times before
/// succeeding, requiring exactly 4 total attempts (the bug this regression
/// guards: `per_key_max_retries` previously left only 1 attempt per key).
/// Run against a paused clock so the exponential backoff sleeps (1s, 2s, 4s)
/// and the per-request timeouts resolve instantly.
#[tokio::test(start_paused = true)]
async fn timeout_backoff_then_success_on_fourth_attempt() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
		.up_to_n_times(3)
		.with_priority(1)
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"choices": [{ "message": { "content": "ok" } }],
		})))
		.with_priority(2)
		.mount(&server)
		.await;

	let cfg = openrouter_config(vec!["key-a"], server.uri());
	let transport = HttpTransport::new(None).unwrap();
	let client = PoolClient::new(&cfg, transport).unwrap();

	let response = client.call(fingerprint()).await.expect("the fourth attempt should succeed");
	assert_eq!(response.text(), Some("ok"));

	let stats = client.stats();
	assert_eq!(stats.keys[0].total_requests, 4, "three timeouts plus the final success");
	assert_eq!(stats.keys[0].total_successes, 1);
	assert_eq!(stats.keys[0].total_failures, 3);
}

/// §8 scenario 3: auth error is fatal and not retried across keys.
#[tokio::test]
async fn auth_error_short_circuits_pool() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/chat/completions"))
		.respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
		.mount(&server)
		.await;

	let cfg = openrouter_config(vec!["key-a", "key-b"], server.uri());
	let transport = HttpTransport::new(None).unwrap();
	let client = PoolClient::new(&cfg, transport).unwrap();

	let result = client.call(fingerprint()).await;
	assert!(result.is_err(), "auth error must surface, not be swallowed by retry");

	let stats = client.stats();
	let untouched_requests: u64 = stats.keys.iter().map(|k| k.total_requests).sum();
	assert_eq!(untouched_requests, 1, "only the first key should have been attempted");
}
