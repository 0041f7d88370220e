//! Completion-service adapter. Responses are untrusted free text; nothing here assumes they
//! follow any requested structure.

use crate::config::ApiConfig;
use crate::error::{FuseError, Result};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Free text in, free text out. Used for judging, field extraction and answer generation.
#[async_trait]
pub trait Completion: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client (Together AI by default).
pub struct ChatClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: None,
            max_tokens: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &ApiConfig) -> Result<Self> {
        Ok(Self::new(cfg.base_url.clone(), cfg.model.clone(), cfg.require_key()?))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn endpoint(&self) -> String { format!("{}/chat/completions", self.base_url) }
}

#[async_trait]
impl Completion for ChatClient {
    fn name(&self) -> &str { &self.model }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "sending completion request");
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FuseError::external("completion", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(FuseError::external("completion", format!("{status}: {text}")));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| FuseError::external("completion", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FuseError::external("completion", "response carried no choices"))
    }
}

/// Wraps any [`Completion`] with timeouts and bounded retries.
pub struct Resilient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Completion> Resilient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self { Self { inner, policy } }
}

#[async_trait]
impl<C: Completion> Completion for Resilient<C> {
    fn name(&self) -> &str { self.inner.name() }

    async fn complete(&self, prompt: &str) -> Result<String> {
        with_retry(self.inner.name(), &self.policy, || self.inner.complete(prompt)).await
    }
}
