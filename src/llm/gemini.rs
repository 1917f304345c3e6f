//! §4.5/§6: Gemini native `generateContent` wire format. Module shape
//! (a small struct implementing `super::Provider`) follows
//! `llm/gemini.rs`'s `Provider` struct; the wire format itself follows
//! `api-gateway/app/clients/gemini.py`'s `generate_text`/`generate_from_image`
//! (`{base}/models/{model}:generateContent?key={key}`), not the teacher's
//! own OpenAI-compatible Gemini endpoint.

use base64::Engine;
use http::{HeaderMap, HeaderValue, Method};
use serde_json::json;

use crate::config::ProviderConfig;
use crate::keypool::Key;

use super::{BuiltRequest, CallMethod, Provider, ProviderKind, RequestFingerprint};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
	base_url: String,
	model_text: String,
	model_vision: String,
}

impl GeminiProvider {
	pub fn new(cfg: &ProviderConfig) -> Self {
		Self {
			base_url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
			model_text: cfg.model_text.clone(),
			model_vision: cfg.model_vision.clone(),
		}
	}

	fn url(&self, model: &str, key: &Key) -> String {
		format!("{}/models/{model}:generateContent?key={}", self.base_url, key.secret)
	}
}

impl Provider for GeminiProvider {
	const KIND: ProviderKind = ProviderKind::GeminiV1Beta;

	fn build_text(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest {
		debug_assert_eq!(fp.method, CallMethod::Text);
		let mut headers = HeaderMap::new();
		headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

		let mut body = json!({
			"contents": [{
				"role": "user",
				"parts": [{ "text": fp.prompt }],
			}],
		});
		apply_common_fields(&mut body, fp);

		BuiltRequest {
			method: Method::POST,
			url: self.url(&self.model_text, key),
			headers,
			body: Some(body),
		}
	}

	fn build_vision(&self, key: &Key, fp: &RequestFingerprint) -> BuiltRequest {
		debug_assert_eq!(fp.method, CallMethod::Vision);
		let mut headers = HeaderMap::new();
		headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

		let image = fp.image.as_ref().expect("vision fingerprint without image");
		let b64 = base64::engine::general_purpose::STANDARD.encode(&image.bytes);

		let mut body = json!({
			"contents": [{
				"role": "user",
				"parts": [
					{ "text": fp.prompt },
					{ "inlineData": { "mimeType": image.mime, "data": b64 } },
				],
			}],
		});
		apply_common_fields(&mut body, fp);

		BuiltRequest {
			method: Method::POST,
			url: self.url(&self.model_vision, key),
			headers,
			body: Some(body),
		}
	}
}

fn apply_common_fields(body: &mut serde_json::Value, fp: &RequestFingerprint) {
	if let Some(mime) = &fp.response_mime {
		body["generationConfig"] = json!({ "responseMimeType": mime });
	}
	if let Some(sys) = &fp.system_instructions {
		body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn key() -> Key {
		Key { secret: "AIzaSyTESTKEY00000000".to_string(), index: 0 }
	}

	fn cfg() -> ProviderConfig {
		ProviderConfig {
			api_keys: vec![],
			model_text: "gemini-1.5-flash".to_string(),
			model_vision: "gemini-1.5-flash".to_string(),
			timeout: Duration::from_secs(30),
			qps_per_key: 1.0,
			burst_multiplier: 1.0,
			strategy: crate::keypool::SelectionStrategy::RoundRobin,
			base_url: None,
			app_url: None,
			app_name: None,
		}
	}

	#[test]
	fn text_request_hits_generate_content_with_key_query_param() {
		let provider = GeminiProvider::new(&cfg());
		let fp = RequestFingerprint {
			method: CallMethod::Text,
			prompt: "hello".to_string(),
			system_instructions: None,
			image: None,
			response_mime: None,
			timeout: Duration::from_secs(30),
		};
		let req = provider.build_text(&key(), &fp);
		assert!(req.url.ends_with(":generateContent?key=AIzaSyTESTKEY00000000"));
		assert_eq!(req.body.unwrap()["contents"][0]["parts"][0]["text"], "hello");
	}

	#[test]
	fn vision_request_encodes_image_as_inline_data() {
		let provider = GeminiProvider::new(&cfg());
		let fp = RequestFingerprint {
			method: CallMethod::Vision,
			prompt: "describe".to_string(),
			system_instructions: None,
			image: Some(super::super::ImageInput { bytes: vec![1, 2, 3], mime: "image/png".to_string() }),
			response_mime: None,
			timeout: Duration::from_secs(30),
		};
		let req = provider.build_vision(&key(), &fp);
		let body = req.body.unwrap();
		assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
	}
}
