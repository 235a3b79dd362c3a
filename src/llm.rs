//! Hosted language and vision model clients.
//!
//! Two capabilities are consumed:
//! - **[`TextModel`]**: chat completion, used to summarize text and tables
//!   and to generate answers. [`GroqClient`] talks to Groq's
//!   OpenAI-compatible `/chat/completions` endpoint.
//! - **[`VisionModel`]**: image description. [`GeminiClient`] calls
//!   Gemini's `generateContent` with the image inlined as base64.
//!
//! Each call makes exactly one HTTP request and classifies failures into
//! [`ProviderError`]; retrying is the caller's job (see [`crate::retry`]).

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::{Credentials, SummarizationConfig};
use crate::models::ImageData;
use crate::retry::Retryable;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rate limited (HTTP 429): {body}")]
    RateLimited { provider: &'static str, body: String },

    #[error("{provider} server error {status}: {body}")]
    Server {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected the request ({status}): {body}")]
    Client {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} connection error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: &'static str },

    /// JSON mode was requested and the model's output failed validation.
    /// `generation` holds whatever the model produced.
    #[error("{provider} produced output that is not valid JSON")]
    InvalidJson {
        provider: &'static str,
        generation: String,
    },
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Server { .. }
            | ProviderError::Network { .. }
            | ProviderError::Malformed { .. }
            | ProviderError::EmptyResponse { .. } => true,
            // Repeating the same prompt is the caller's decision, not the transport's.
            ProviderError::Client { .. } | ProviderError::InvalidJson { .. } => false,
        }
    }
}

pub(crate) fn classify_status(
    provider: &'static str,
    status: reqwest::StatusCode,
    body: String,
) -> ProviderError {
    if status.as_u16() == 429 {
        ProviderError::RateLimited { provider, body }
    } else if status.is_server_error() {
        ProviderError::Server {
            provider,
            status: status.as_u16(),
            body,
        }
    } else {
        ProviderError::Client {
            provider,
            status: status.as_u16(),
            body,
        }
    }
}

pub(crate) fn network_error(provider: &'static str, e: reqwest::Error) -> ProviderError {
    ProviderError::Network {
        provider,
        message: e.to_string(),
    }
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_output: bool,
}

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Model identifier recorded with every summary it produces.
    fn model_name(&self) -> &str;

    /// Run a chat completion and return the assistant text, trimmed.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Describe an image, following `prompt`.
    async fn describe_image(&self, image: &ImageData, prompt: &str)
        -> Result<String, ProviderError>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ Groq (OpenAI-compatible chat) ============

pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(GROQ_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Build a client for `model`. Fails if `GROQ_API_KEY` is missing.
    pub fn from_config(
        config: &SummarizationConfig,
        credentials: &Credentials,
        model: &str,
    ) -> Result<Self> {
        let key = credentials.require_text()?;
        Self::new(
            key,
            model,
            config.groq_base_url.as_deref(),
            config.timeout_secs,
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[async_trait]
impl TextModel for GroqClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        const PROVIDER: &str = "Groq";

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::BAD_REQUEST {
                if let Some(generation) = json_validate_failure(&body_text) {
                    return Err(ProviderError::InvalidJson {
                        provider: PROVIDER,
                        generation,
                    });
                }
            }
            return Err(classify_status(PROVIDER, status, body_text));
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;
        parse_chat_response(PROVIDER, &json)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    failed_generation: Option<String>,
}

/// The rejected output from a JSON-mode `json_validate_failed` error body.
pub fn json_validate_failure(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    if envelope.error.code.as_deref() != Some("json_validate_failed") {
        return None;
    }
    Some(envelope.error.failed_generation.unwrap_or_default())
}

/// Extract `choices[0].message.content` from a chat completion response.
pub fn parse_chat_response(
    provider: &'static str,
    json: &serde_json::Value,
) -> Result<String, ProviderError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| ProviderError::Malformed {
            provider,
            message: "missing choices[0].message.content".to_string(),
        })?;

    let text = content.as_str().unwrap_or_default().trim();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse { provider });
    }
    Ok(text.to_string())
}

// ============ Gemini (vision) ============

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Build the vision client. Fails if `GEMINI_API_KEY` is missing.
    pub fn from_config(config: &SummarizationConfig, credentials: &Credentials) -> Result<Self> {
        let key = credentials.require_vision()?;
        Self::new(
            key,
            &config.vision_model,
            config.gemini_base_url.as_deref(),
            config.timeout_secs,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl VisionModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn describe_image(
        &self,
        image: &ImageData,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        const PROVIDER: &str = "Gemini";

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: image.mime.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| network_error(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status, body_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| network_error(PROVIDER, e))?;
        parse_gemini_response(PROVIDER, &body)
    }
}

/// Concatenate the text parts of the first candidate.
pub fn parse_gemini_response(provider: &'static str, body: &str) -> Result<String, ProviderError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed {
            provider,
            message: e.to_string(),
        })?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::EmptyResponse { provider });
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_response_content_is_trimmed() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  A summary.\n" } }]
        });
        assert_eq!(parse_chat_response("Groq", &body).unwrap(), "A summary.");
    }

    #[test]
    fn chat_response_without_choices_is_malformed() {
        let err = parse_chat_response("Groq", &json!({ "error": "x" })).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn blank_chat_content_is_empty_response() {
        let body = json!({ "choices": [{ "message": { "content": "   " } }] });
        let err = parse_chat_response("Groq", &body).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse { .. }));
    }

    #[test]
    fn gemini_parts_are_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"A bar "},{"text":"chart."}]}}]}"#;
        assert_eq!(parse_gemini_response("Gemini", body).unwrap(), "A bar chart.");
    }

    #[test]
    fn gemini_without_candidates_is_empty() {
        let err = parse_gemini_response("Gemini", r#"{"candidates":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse { .. }));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status("p", StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status("p", StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify_status("p", StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!classify_status("p", StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn json_validate_failure_keeps_failed_generation() {
        let body = json!({
            "error": {
                "message": "Failed to generate JSON. Please adjust your prompt.",
                "type": "invalid_request_error",
                "code": "json_validate_failed",
                "failed_generation": "Attention weights the inputs."
            }
        })
        .to_string();
        assert_eq!(
            json_validate_failure(&body).as_deref(),
            Some("Attention weights the inputs.")
        );

        let other = json!({ "error": { "message": "bad model", "code": "model_not_found" } });
        assert_eq!(json_validate_failure(&other.to_string()), None);
        assert_eq!(json_validate_failure("not json"), None);
    }

    #[test]
    fn invalid_json_is_left_to_the_caller() {
        let err = ProviderError::InvalidJson {
            provider: "Groq",
            generation: "x".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn clients_require_credentials() {
        let cfg = SummarizationConfig::default();
        let none = Credentials::default();
        assert!(GroqClient::from_config(&cfg, &none, "m").is_err());
        assert!(GeminiClient::from_config(&cfg, &none).is_err());
    }

    #[test]
    fn inline_image_part_serializes_as_inline_data() {
        let part = Part::Inline {
            inline_data: InlineData {
                mime_type: "image/jpeg".to_string(),
                data: "AAAA".to_string(),
            },
        };
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v["inline_data"]["mime_type"], "image/jpeg");
    }
}
