//! LLM completion clients.
//!
//! The runtime only ever talks to [`LlmClient`]. [`FallbackLlmClient`] wraps
//! a primary model and at most one fallback; there are no further retries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use taskpilot_core::config::{LlmConfig, LlmProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm configuration error: {0}")]
    Configuration(String),
    #[error("llm transport error: {0}")]
    Http(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Response(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, LlmError>;
}

/// Tries the primary client, then the fallback exactly once.
pub struct FallbackLlmClient {
    primary: Arc<dyn LlmClient>,
    fallback: Option<Arc<dyn LlmClient>>,
}

impl FallbackLlmClient {
    pub fn new(primary: Arc<dyn LlmClient>, fallback: Option<Arc<dyn LlmClient>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl LlmClient for FallbackLlmClient {
    fn model(&self) -> &str {
        self.primary.model()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, LlmError> {
        let primary_error = match self.primary.complete(messages, temperature, max_tokens).await {
            Ok(completion) => return Ok(completion),
            Err(error) => error,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };
        warn!(
            event_name = "llm.completion.fallback",
            primary_model = self.primary.model(),
            fallback_model = fallback.model(),
            error = %primary_error,
            "primary model failed; trying fallback"
        );
        fallback.complete(messages, temperature, max_tokens).await
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints. Ollama serves
/// the same API under `/v1`.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Http(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                .map_err(|error| LlmError::Configuration(error.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Completion, LlmError> {
        let body = ChatRequest { model: &self.model, messages, temperature, max_tokens };
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Http(error.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|error| LlmError::Http(error.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Status { status: status.as_u16(), body: text });
        }

        parse_completion(&text)
    }
}

/// Decodes an OpenAI-style chat completion body.
pub fn parse_completion(body: &str) -> Result<Completion, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|error| LlmError::Response(error.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::Response("missing choices[0].message.content".to_string()))?;
    let usage = parsed.usage.unwrap_or_default();

    Ok(Completion {
        content,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    })
}

/// Builds the primary client plus the configured fallback model.
pub fn client_from_config(config: &LlmConfig) -> Result<FallbackLlmClient, LlmError> {
    let base_url = match (&config.base_url, config.provider) {
        (Some(url), _) => url.clone(),
        (None, LlmProvider::OpenAi) => "https://api.openai.com/v1".to_string(),
        (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
    };
    if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
        return Err(LlmError::Configuration("llm.api_key is required for openai".to_string()));
    }
    let timeout = Duration::from_secs(config.timeout_secs);

    let primary: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::new(
        &base_url,
        config.api_key.clone(),
        config.model.clone(),
        timeout,
    )?);
    let fallback = match config.fallback_model.as_deref().filter(|model| *model != config.model) {
        Some(model) => Some(Arc::new(OpenAiCompatibleClient::new(
            &base_url,
            config.api_key.clone(),
            model,
            timeout,
        )?) as Arc<dyn LlmClient>),
        None => None,
    };

    Ok(FallbackLlmClient::new(primary, fallback))
}

/// Client that replays scripted completions and records every request.
pub struct ScriptedLlmClient {
    model: String,
    responses: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new(model: impl Into<String>, responses: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(content: impl Into<String>) -> Self {
        Self::new(
            "scripted",
            vec![Ok(Completion { content: content.into(), prompt_tokens: 10, completion_tokens: 5 })],
        )
    }

    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<Completion, LlmError> {
        self.requests.lock().await.push(messages.to_vec());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Response("no scripted response left".to_string())))
    }
}
