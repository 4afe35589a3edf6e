//! AI Client Abstraction (spec §4.5): a single `chat()` operation behind a
//! trait, with two adapters for the two request/response shapes the
//! providers in this space actually use, sharing one `reqwest::Client` the
//! way the rest of this stack shares a single HTTP client per process.

use crate::error::AppError;
use codereview_core::model::Usage;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub temperature: f32,
    pub json_mode: bool,
    pub top_p: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: String,
    pub usage: Usage,
}

#[async_trait::async_trait]
pub trait AiClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<ChatResult, AppError>;
}

/// Adapter for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into(), api_key: api_key.into() }
    }
}

#[async_trait::async_trait]
impl AiClient for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<ChatResult, AppError> {
        let body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
            "response_format": if params.json_mode { json!({"type": "json_object"}) } else { Value::Null },
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("{status}: {text}")));
        }

        let payload: Value = resp.json().await.map_err(|e| AppError::Transport(e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::Provider("missing choices[0].message.content".into()))?
            .to_string();

        let usage = Usage {
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: payload["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ChatResult { content, usage })
    }
}

/// Adapter for the Anthropic `/v1/messages` shape: system prompt is a
/// top-level field, not a message with role "system", and usage tokens are
/// reported separately as input/output rather than prompt/completion.
pub struct AnthropicMessagesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicMessagesClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into(), api_key: api_key.into() }
    }
}

#[async_trait::async_trait]
impl AiClient for AnthropicMessagesClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<ChatResult, AppError> {
        let system: String = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "system": system,
            "messages": turns,
        });

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!("{status}: {text}")));
        }

        let payload: Value = resp.json().await.map_err(|e| AppError::Transport(e.to_string()))?;
        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| AppError::Provider("missing content[0].text".into()))?
            .to_string();

        let usage = Usage {
            prompt_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
            total_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0)
                + payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ChatResult { content, usage })
    }
}

pub fn build_http_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .expect("reqwest client with static TLS config should always build")
}

/// Result of a JSON-mode chat call that survived the retry loop.
pub struct JsonChatOutcome {
    pub value: Value,
    pub usage: Usage,
}

/// Requests a JSON-mode completion, parses it, and retries with linear
/// backoff on either transport or parse failure, per spec §4.5/§4.6.3. Never
/// returns a provider error directly: exhaustion yields `None` so callers can
/// treat it the same as the group-/file-level "terminal failure" case.
pub async fn safe_json_chat(
    client: &dyn AiClient,
    messages: &[ChatMessage],
    params: &ChatParams,
    max_retries: u32,
) -> Option<JsonChatOutcome> {
    let mut last_err: Option<String> = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300 * attempt as u64)).await;
        }
        match client.chat(messages, params).await {
            Ok(result) => match serde_json::from_str::<Value>(&result.content) {
                Ok(value) => return Some(JsonChatOutcome { value, usage: result.usage }),
                Err(e) => {
                    last_err = Some(format!("json parse failed: {e}"));
                }
            },
            Err(e) => {
                last_err = Some(e.to_string());
            }
        }
    }
    if let Some(err) = last_err {
        tracing::warn!(error = %err, attempts = max_retries + 1, "AI chat call exhausted retries");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient {
        content: String,
    }

    #[async_trait::async_trait]
    impl AiClient for StubClient {
        async fn chat(&self, _messages: &[ChatMessage], _params: &ChatParams) -> Result<ChatResult, AppError> {
            Ok(ChatResult { content: self.content.clone(), usage: Usage::default() })
        }
    }

    #[tokio::test]
    async fn safe_json_chat_parses_valid_json_on_first_try() {
        let client = StubClient { content: r#"{"complexity": 5}"#.to_string() };
        let params = ChatParams { model: "test".into(), temperature: 0.0, json_mode: true, top_p: 1.0, max_tokens: 4096 };
        let outcome = safe_json_chat(&client, &[ChatMessage::user("x")], &params, 3).await;
        assert_eq!(outcome.unwrap().value["complexity"], 5);
    }

    #[tokio::test]
    async fn safe_json_chat_returns_none_on_persistent_malformed_json() {
        let client = StubClient { content: "not json".to_string() };
        let params = ChatParams { model: "test".into(), temperature: 0.0, json_mode: true, top_p: 1.0, max_tokens: 4096 };
        let outcome = safe_json_chat(&client, &[ChatMessage::user("x")], &params, 1).await;
        assert!(outcome.is_none());
    }
}
