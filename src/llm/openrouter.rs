//! §4.5/§6: OpenRouter `chat/completions` wire format, Bearer auth plus the
//! `HTTP-Referer`/`X-Title` attribution headers.

use http::{HeaderMap, HeaderValue, Method};
use serde_json::json;

use crate::config::ProviderConfig;
use crate::keypool::Key;

use super::{BuiltRequest, CallMethod, Provider, ProviderKind, RequestFingerprint};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
	base_url: String,
	model_text: String,
	model_vision: String,
	app_url: Option<String>,
	app_name: Option<String>,
}

impl OpenRouterProvider {
	pub fn new(cfg: &ProviderConfig) -> Self {
		Self {
			base_url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
			model_text: cfg.model_text.clone(),
			model_vision: cfg.model_vision.clone(),
			app_url: cfg.app_url.clone(),
			app_name: cfg.app_name.clone(),
		}
	}

	fn headers(&self, key: &Key) -> HeaderMap {
		let mut headers = HeaderMap::new();
		let auth = format!("Bearer {}", key.secret);
		headers.insert(
			http::header::AUTHORIZATION,
			HeaderValue::from_str(&auth).expect("bearer header value"),
		);
		if let Some(app_url) = &self.app_url {
			if let Ok(v) = HeaderValue::from_str(app_url) {
				headers.insert("HTTP-Referer", v);
			}
		}
		if let Some(app_name) = &self.app_name {
			if let Ok(v) = HeaderValue::from_str(app_name) {
				headers.insert("X-Title", v);
			}
		}
		headers
	}
}

impl Provider for OpenRouterProvider {
	const KIND: ProviderKind = ProviderKind::OpenRouterV1;

	fn build_text(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest {
		debug_assert_eq!(fp.method, CallMethod::Text);
		let mut messages = Vec::new();
		if let Some(sys) = &fp.system_instructions {
			messages.push(json!({ "role": "system", "content": sys }));
		}
		messages.push(json!({ "role": "user", "content": fp.prompt }));

		let body = build_body(&self.model_text, messages, fp);

		BuiltRequest {
			method: Method::POST,
			url: format!("{}/chat/completions", self.base_url),
			headers: self.headers(key),
			body: Some(body),
		}
	}

	fn build_vision(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest {
		debug_assert_eq!(fp.method, CallMethod::Vision);
		let image = fp.image.as_ref().expect("vision fingerprint without image");
		let data_url = format!(
			"data:{};base64,{}",
			image.mime,
			base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &image.bytes)
		);

		let mut messages = Vec::new();
		if let Some(sys) = &fp.system_instructions {
			messages.push(json!({ "role": "system", "content": sys }));
		}
		messages.push(json!({
			"role": "user",
			"content": [
				{ "type": "text", "text": fp.prompt },
				{ "type": "image_url", "image_url": { "url": data_url } },
			],
		}));

		let body = build_body(&self.model_vision, messages, fp);

		BuiltRequest {
			method: Method::POST,
			url: format!("{}/chat/completions", self.base_url),
			headers: self.headers(key),
			body: Some(body),
		}
	}
}

fn build_body(model: &str, messages: Vec<serde_json::Value>, fp: &RequestFingerprint) -> serde_json::Value {
	let mut body = json!({ "model": model, "messages": messages });
	if let Some(mime) = &fp.response_mime {
		body["response_format"] = json!({ "type": mime });
	}
	body
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn key() -> Key {
		Key { secret: "sk-or-v1-test".to_string(), index: 0 }
	}

	fn cfg() -> ProviderConfig {
		ProviderConfig {
			api_keys: vec![],
			model_text: "openrouter/auto".to_string(),
			model_vision: "openrouter/auto".to_string(),
			timeout: Duration::from_secs(30),
			qps_per_key: 1.0,
			burst_multiplier: 1.0,
			strategy: crate::keypool::SelectionStrategy::RoundRobin,
			base_url: None,
			app_url: Some("https://example.com".to_string()),
			app_name: Some("gateway-core".to_string()),
		}
	}

	#[test]
	fn text_request_carries_bearer_and_attribution_headers() {
		let provider = OpenRouterProvider::new(&cfg());
		let fp = RequestFingerprint {
			method: CallMethod::Text,
			prompt: "hi".to_string(),
			system_instructions: None,
			image: None,
			response_mime: None,
			timeout: Duration::from_secs(30),
		};
		let req = provider.build_text(&key(), &fp);
		assert_eq!(req.headers.get(http::header::AUTHORIZATION).unwrap(), "Bearer sk-or-v1-test");
		assert_eq!(req.headers.get("HTTP-Referer").unwrap(), "https://example.com");
		assert_eq!(req.headers.get("X-Title").unwrap(), "gateway-core");
	}

	#[test]
	fn vision_request_embeds_data_url() {
		let provider = OpenRouterProvider::new(&cfg());
		let fp = RequestFingerprint {
			method: CallMethod::Vision,
			prompt: "describe".to_string(),
			system_instructions: None,
			image: Some(super::super::ImageInput { bytes: vec![9, 9, 9], mime: "image/jpeg".to_string() }),
			response_mime: None,
			timeout: Duration::from_secs(30),
		};
		let req = provider.build_vision(&key(), &fp);
		let body = req.body.unwrap();
		let url = body["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
		assert!(url.starts_with("data:image/jpeg;base64,"));
	}
}
