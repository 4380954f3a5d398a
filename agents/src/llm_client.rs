//! Model-provider client interface (SPEC_FULL.md §6.2): the boundary
//! between an agent's dispatch loop and whatever actually talks to an LLM
//! API.
//!
//! Mirrors the reference transport layer's enum-wrapping pattern — an
//! async trait method that carries a generic tool-schema parameter isn't
//! dyn-compatible, so concrete clients are wrapped in [`LlmClient`] rather
//! than boxed as `dyn`.

use concolic_core::Usage;
use serde_json::Value;

use crate::message::Message;

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<Value>,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Concrete client enum — mirrors the reference transport layer's
/// enum-wrapping pattern rather than boxing a `dyn` trait, since an async
/// `complete` method taking borrowed tool schemas isn't dyn-compatible.
#[derive(Debug, Clone)]
pub enum LlmClient {
    Http(HttpLlmClient),
    Fake(FakeLlmClient),
}

impl LlmClient {
    pub async fn complete(
        &self,
        messages: &[Message],
        tool_schemas: &[Value],
        temperature: f32,
    ) -> Result<LlmResponse> {
        match self {
            LlmClient::Http(c) => c.complete(messages, tool_schemas, temperature).await,
            LlmClient::Fake(c) => c.complete(messages, tool_schemas, temperature).await,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            LlmClient::Http(c) => c.model_name(),
            LlmClient::Fake(c) => c.model_name(),
        }
    }
}

/// Real HTTP-backed client, speaking an OpenAI-compatible chat-completions
/// API with function calling.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tool_schemas: &[Value],
        temperature: f32,
    ) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
            "tools": tool_schemas,
            "temperature": temperature,
        });

        let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Transport(format!("http {status}: {payload}")));
        }

        let choice = payload["choices"][0]["message"].clone();
        let content = choice["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = choice["tool_calls"].as_array().cloned().unwrap_or_default();
        let usage_json = &payload["usage"];
        let usage = Usage {
            input_tokens: usage_json["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage_json["completion_tokens"].as_u64().unwrap_or(0),
            cache_read_tokens: usage_json["cache_read_tokens"].as_u64().unwrap_or(0),
            cache_write_tokens: usage_json["cache_write_tokens"].as_u64().unwrap_or(0),
            cost_usd: usage_json["cost_usd"].as_f64().unwrap_or(0.0),
            latency_ms: started.elapsed().as_millis() as u64,
            call_cnt: 1,
        };

        Ok(LlmResponse { content, tool_calls, usage })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted client for tests: returns queued responses in order,
/// regardless of what's asked, so agent-loop and orchestrator tests never
/// depend on network access.
#[derive(Debug, Clone, Default)]
pub struct FakeLlmClient {
    model: String,
    script: std::sync::Arc<tokio::sync::Mutex<std::collections::VecDeque<LlmResponse>>>,
}

impl FakeLlmClient {
    pub fn new(model: impl Into<String>, responses: Vec<LlmResponse>) -> Self {
        Self {
            model: model.into(),
            script: std::sync::Arc::new(tokio::sync::Mutex::new(responses.into())),
        }
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tool_schemas: &[Value],
        _temperature: f32,
    ) -> Result<LlmResponse> {
        let mut script = self.script.lock().await;
        script
            .pop_front()
            .ok_or_else(|| LlmError::Malformed("fake client script exhausted".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            tool_calls: vec![],
            usage: Usage::default(),
        }
    }

    #[tokio::test]
    async fn fake_client_replays_script_in_order() {
        let client = LlmClient::Fake(FakeLlmClient::new(
            "fake-model",
            vec![dummy_response("first"), dummy_response("second")],
        ));
        let r1 = client.complete(&[], &[], 0.2).await.unwrap();
        let r2 = client.complete(&[], &[], 0.2).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
    }

    #[tokio::test]
    async fn fake_client_errors_when_exhausted() {
        let client = LlmClient::Fake(FakeLlmClient::new("fake-model", vec![]));
        assert!(client.complete(&[], &[], 0.2).await.is_err());
    }
}
