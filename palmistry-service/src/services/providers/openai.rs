//! OpenAI-compatible chat completions provider.
//!
//! Sends the JPEG as a base64 data URL next to the caller's prompt and reads
//! the first choice of the reply.

use super::{into_vision_result, ProviderError, VisionProvider, SUBJECT_CHECK_INSTRUCTION};
use crate::models::{TokenUsage, VisionResult};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Secret<String>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub image_detail: String,
    pub timeout: Duration,
}

/// Vision provider speaking the `/chat/completions` API.
pub struct OpenAiVisionProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiVisionProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    fn build_request<'a>(&'a self, image_jpeg: &[u8], prompt: &'a str) -> ChatRequest<'a> {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image_jpeg)
        );

        ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(SUBJECT_CHECK_INSTRUCTION),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text { text: prompt },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: data_url,
                                detail: &self.config.image_detail,
                            },
                        },
                    ]),
                },
            ],
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    async fn classify_and_describe(
        &self,
        image_jpeg: &[u8],
        prompt: &str,
    ) -> Result<VisionResult, ProviderError> {
        let request = self.build_request(image_jpeg, prompt);

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            image_bytes = image_jpeg.len(),
            "Sending request to vision API"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = upstream_message(&error_text).unwrap_or(error_text);

            tracing::warn!(status = %status, error = %message, "Vision API returned an error");

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ProviderError::Unauthorized(message)
                }
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
                _ => ProviderError::ApiError(format!("{}: {}", status, message)),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        let completion: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        let raw = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        let result = into_vision_result(&raw, completion.usage);

        tracing::debug!(
            subject_present = result.is_subject_present,
            text_len = result.text.len(),
            total_tokens = result.usage.map(|u| u.total_tokens),
            "Vision API reply parsed"
        );

        Ok(result)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::NotConfigured(
                "Vision API key not configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pull `error.message` out of an OpenAI-style error body.
fn upstream_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty())
}

// ============================================================================
// Chat Completions Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: String,
    detail: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiVisionProvider {
        OpenAiVisionProvider::new(OpenAiConfig {
            api_key: Secret::new("sk-test".to_string()),
            api_base: "http://localhost:1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 2048,
            image_detail: "low".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn request_carries_instruction_prompt_and_image() {
        let provider = provider();
        let body = serde_json::to_value(provider.build_request(&[0xff, 0xd8], "Read my palm")).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], SUBJECT_CHECK_INSTRUCTION);

        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Read my palm");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9g=");
        assert_eq!(parts[1]["image_url"]["detail"], "low");
    }

    #[test]
    fn upstream_message_reads_openai_error_envelope() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(
            upstream_message(body).as_deref(),
            Some("Incorrect API key provided")
        );
        assert_eq!(upstream_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn missing_content_deserializes_to_empty_reply() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        assert_eq!(raw, "");
        assert!(parsed.usage.is_none());
    }
}
