use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: MessageContent::Text(text.into()) }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: "user".to_string(), content: MessageContent::Parts(parts) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub response_format: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("model response carried no message content")]
    MissingContent,
    #[error("model refused the request: {0}")]
    Refusal(String),
}

/// OpenAI-compatible chat completion endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiChatModel {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.ai().openai_base_url.clone(),
            settings.ai().openai_api_key.clone(),
            settings.ai().request_timeout().max(settings.ai().vision_timeout()),
        )
    }

    /// `timeout` bounds each HTTP exchange; callers layer their own
    /// per-call deadline on top.
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
            "max_completion_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(format) = &request.response_format {
            payload["response_format"] = format.clone();
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body: Value = response.json().await.map_err(|err| self.transport_error(err))?;
        parse_completion(&body)
    }
}

impl OpenAiChatModel {
    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

fn parse_completion(body: &Value) -> Result<ChatCompletion, LlmError> {
    let message = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or(LlmError::MissingContent)?;

    if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
        return Err(LlmError::Refusal(refusal.to_string()));
    }

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or(LlmError::MissingContent)?
        .to_string();

    let usage = body.get("usage");
    Ok(ChatCompletion {
        content,
        prompt_tokens: usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64),
        completion_tokens: usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::system("grade"), ChatMessage::user("text")],
            temperature: 0.2,
            max_tokens: 256,
            response_format: Some(json!({"type": "json_object"})),
        }
    }

    fn model(server: &MockServer, timeout: Duration) -> OpenAiChatModel {
        OpenAiChatModel::new(format!("{}/v1/", server.uri()), "test-key".to_string(), timeout)
            .expect("client")
    }

    #[test]
    fn image_parts_serialize_in_openai_shape() {
        let message = ChatMessage::user_parts(vec![
            ContentPart::Text { text: "look".to_string() },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string(),
                    detail: Some("low".to_string()),
                },
            },
        ]);
        let encoded = serde_json::to_value(&message).expect("encode");
        assert_eq!(encoded["content"][0]["type"], "text");
        assert_eq!(encoded["content"][1]["type"], "image_url");
        assert_eq!(encoded["content"][1]["image_url"]["detail"], "low");
    }

    #[tokio::test]
    async fn returns_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "temperature": 0.2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion =
            model(&server, Duration::from_secs(5)).complete(&request()).await.expect("complete");
        assert_eq!(completion.content, "{\"ok\":true}");
        assert_eq!(completion.prompt_tokens, Some(12));
        assert_eq!(completion.completion_tokens, Some(3));
    }

    #[tokio::test]
    async fn non_success_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let err = model(&server, Duration::from_secs(5)).complete(&request()).await.unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err =
            model(&server, Duration::from_millis(200)).complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn refusal_is_surfaced() {
        let body = json!({"choices": [{"message": {"content": null, "refusal": "no"}}]});
        assert!(matches!(parse_completion(&body), Err(LlmError::Refusal(_))));
        assert!(matches!(parse_completion(&json!({})), Err(LlmError::MissingContent)));
    }
}
