//! Gemini API backend
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{DecodingParams, LanguageModel, ModelError, ModelReply};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The key travels in a header so it never shows up in URLs or error text
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiModel {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{}:generateContent", BASE_URL, model),
            model: model.to_string(),
        })
    }

    /// Point the client at a different host (proxies, local stubs)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &DecodingParams,
        timeout: Duration,
    ) -> Result<ModelReply, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::Misconfigured(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = build_request(prompt, params);

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(classify_status(status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            ModelError::Transport(format!("Gemini body decode error: {}", e))
        })?;

        Ok(extract_reply(gemini_response))
    }
}

/// Throttling and server faults are worth retrying; other client errors are not
fn classify_status(status: StatusCode, body: String) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ModelError::Transport(format!("Gemini API returned {}", status))
    } else {
        ModelError::Misconfigured(format!("Gemini API returned {}: {}", status, body))
    }
}

fn build_request(prompt: &str, params: &DecodingParams) -> GeminiRequest {
    GeminiRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            max_output_tokens: params.max_output_tokens,
            response_mime_type: params
                .json_output
                .then(|| "application/json".to_string()),
        },
    }
}

/// Blocked or empty candidates come back as empty text so the guardrail
/// treats them as malformed output rather than a transport fault.
fn extract_reply(response: GeminiResponse) -> ModelReply {
    let text = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let token_count = response
        .usage_metadata
        .and_then(|u| u.total_token_count)
        .and_then(|n| u32::try_from(n).ok());

    ModelReply { text, token_count }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = build_request("What is RSI?", &DecodingParams::default());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is RSI?");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["topK"], 20);
    }

    #[test]
    fn test_reply_extraction() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"summary\":" }, { "text": "\"x\"}" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "totalTokenCount": 42 }
        }))
        .unwrap();

        let reply = extract_reply(response);
        assert_eq!(reply.text, "{\"summary\":\"x\"}");
        assert_eq!(reply.token_count, Some(42));
    }

    #[test]
    fn test_blocked_response_is_empty_text() {
        let response: GeminiResponse =
            serde_json::from_value(serde_json::json!({ "promptFeedback": {} })).unwrap();
        assert_eq!(extract_reply(response).text, "");
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let model = GeminiModel::new("SECRET-KEY-123".to_string(), "x")
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/v1beta/models/x:generateContent");

        let err = model
            .complete("hi", &DecodingParams::default(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(!err.to_string().contains("SECRET-KEY-123"));
        assert!(!format!("{:?}", err).contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let model = GeminiModel::new(String::new(), "gemini-2.0-flash").unwrap();
        let result = model
            .complete("hi", &DecodingParams::default(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ModelError::Misconfigured(_))));
    }
}
