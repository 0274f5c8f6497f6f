use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use super::{GeneratedImage, ImageProvider, ProviderRequest};
use crate::errors::ProviderError;
use crate::truncate_text;

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
];

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// Content filtering disabled across all four harm categories; sent with
    /// every call.
    fn default_safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_NONE",
            })
        })
        .collect()
    }

    fn build_payload(request: &ProviderRequest, image_only: bool) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_type,
                            "data": BASE64.encode(&request.image.bytes),
                        }
                    },
                    { "text": request.instruction },
                ],
            }]),
        );
        if image_only {
            payload.insert(
                "generationConfig".to_string(),
                json!({ "responseModalities": ["IMAGE"] }),
            );
        }
        payload.insert(
            "safetySettings".to_string(),
            Value::Array(Self::default_safety_settings()),
        );
        Value::Object(payload)
    }

    /// One request per call. Transport failures are reported, not retried,
    /// so the batch deadline bounds the whole call.
    fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, ProviderError> {
        self.http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(timeout)
            .json(payload)
            .send()
            .map_err(|err| {
                ProviderError::new(format!(
                    "Gemini request failed ({endpoint}): {}",
                    truncate_text(&err.to_string(), 512)
                ))
            })
    }

    fn call(&self, request: &ProviderRequest, image_only: bool) -> Result<Value, ProviderError> {
        let api_key = request
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(ProviderError::missing_credential)?;
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request, image_only);
        let response = self.post(&endpoint, api_key, &payload, request.timeout)?;
        let response_payload = response_json_or_error(response)?;
        if let Some(reason) = block_reason(&response_payload) {
            return Err(ProviderError::safety_blocked(&reason));
        }
        Ok(response_payload)
    }

    fn extract_image(response_payload: &Value) -> Result<Option<GeneratedImage>, ProviderError> {
        for part in candidate_parts(response_payload) {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .map_err(|err| ProviderError::new(format!("Gemini image base64 decode failed: {err}")))?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            return Ok(Some(GeneratedImage { bytes, mime_type }));
        }
        Ok(None)
    }

    fn extract_text(response_payload: &Value) -> Option<String> {
        let text = candidate_parts(response_payload)
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, request: &ProviderRequest) -> Result<Option<String>, ProviderError> {
        let response_payload = self.call(request, false)?;
        Ok(Self::extract_text(&response_payload))
    }

    fn edit(&self, request: &ProviderRequest) -> Result<Option<GeneratedImage>, ProviderError> {
        let response_payload = self.call(request, true)?;
        Self::extract_image(&response_payload)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, ProviderError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| ProviderError::new(format!("Gemini response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(ProviderError::from_response(code, &truncate_text(&body, 2048)));
    }
    serde_json::from_str(&body)
        .map_err(|err| ProviderError::new(format!("Gemini returned invalid JSON payload: {err}")))
}

fn candidate_parts(response_payload: &Value) -> Vec<Value> {
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Prompt-level blocks, or a first candidate that stopped for safety without
/// producing any parts.
fn block_reason(response_payload: &Value) -> Option<String> {
    if let Some(reason) = response_payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Some(reason.to_string());
    }
    let finish_reason = response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)?;
    if SAFETY_FINISH_REASONS.contains(&finish_reason) && candidate_parts(response_payload).is_empty()
    {
        return Some(finish_reason.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::{block_reason, GeminiProvider};
    use crate::normalize::NormalizedImage;
    use crate::providers::ProviderRequest;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gemini-2.5-flash-image".to_string(),
            instruction: "TASK: add a hat".to_string(),
            image: NormalizedImage {
                bytes: Arc::from(&b"png"[..]),
                mime_type: "image/png",
                width: 1,
                height: 1,
            },
            api_key: Some("key".to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_models() {
        let provider = GeminiProvider::new("https://example.test/v1beta/");
        assert_eq!(
            provider.endpoint_for_model("gemini-3-flash-preview"),
            "https://example.test/v1beta/models/gemini-3-flash-preview:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/x"),
            "https://example.test/v1beta/models/x:generateContent"
        );
    }

    #[test]
    fn payload_always_carries_safety_settings() {
        let analyze = GeminiProvider::build_payload(&request(), false);
        let edit = GeminiProvider::build_payload(&request(), true);
        for payload in [&analyze, &edit] {
            let settings = payload["safetySettings"].as_array().cloned().unwrap_or_default();
            assert_eq!(settings.len(), 4);
            assert!(settings.iter().all(|row| row["threshold"] == json!("BLOCK_NONE")));
        }
        assert!(analyze.get("generationConfig").is_none());
        assert_eq!(edit["generationConfig"]["responseModalities"], json!(["IMAGE"]));
        assert_eq!(edit["contents"][0]["parts"][0]["inlineData"]["data"], json!("cG5n"));
    }

    #[test]
    fn image_and_text_extraction() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "aGk="}}
                ]}
            }]
        });
        let image = GeminiProvider::extract_image(&payload)?;
        assert_eq!(image.as_ref().map(|image| image.bytes.as_slice()), Some(&b"hi"[..]));
        assert_eq!(image.map(|image| image.mime_type).as_deref(), Some("image/jpeg"));
        assert_eq!(
            GeminiProvider::extract_text(&payload).as_deref(),
            Some("Here you go")
        );
        assert!(GeminiProvider::extract_image(&json!({"candidates": []}))?.is_none());
        Ok(())
    }

    #[test]
    fn safety_blocks_are_detected() {
        assert_eq!(
            block_reason(&json!({"promptFeedback": {"blockReason": "SAFETY"}})).as_deref(),
            Some("SAFETY")
        );
        assert_eq!(
            block_reason(&json!({"candidates": [{"finishReason": "IMAGE_SAFETY"}]})).as_deref(),
            Some("IMAGE_SAFETY")
        );
        assert!(block_reason(&json!({"candidates": [{"finishReason": "STOP"}]})).is_none());
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let provider = GeminiProvider::new("http://127.0.0.1:9");
        let mut without_key = request();
        without_key.api_key = None;
        let err = provider.call(&without_key, true).err();
        assert_eq!(
            err.and_then(|err| err.api_status),
            Some("API_KEY_MISSING".to_string())
        );
    }

    #[test]
    fn refused_connection_fails_once_without_backoff() {
        let provider = GeminiProvider::new("http://127.0.0.1:9");
        let started = Instant::now();
        let err = provider.call(&request(), true).err();
        assert!(err.is_some_and(|err| err.message.starts_with("Gemini request failed")));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
