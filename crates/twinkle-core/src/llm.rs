//! Model call capability.
//!
//! The dispatcher only sees [`LlmClient`]. [`OpenAiCompatClient`] talks to
//! any `/chat/completions` endpoint; tests use `fakes::ScriptedLlm`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{LlmApiConfig, ModelConfig};
use crate::domain::TokenUsage;

/// Errors from a single model call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

/// What the dispatcher needs back from one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    /// Reasoning returned out of band by the endpoint, if any.
    pub reasoning: Option<String>,
    pub usage: TokenUsage,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Ask the model one rendered question in the given prompt language.
    async fn call(&self, prompt: &str, language: &str) -> Result<LlmResponse, LlmError>;
}

/// System prompt for a language tag. Unknown tags fall back to `zh`.
pub fn system_prompt(language: &str) -> &'static str {
    match language {
        "en" => {
            "You are a helpful assistant. Read the multiple-choice question and \
             reply with the correct option in the form: The answer is (X)."
        }
        _ => "你是一個有幫助的助理。請閱讀以下選擇題，並以「答案是 (X)」的格式回答正確選項。",
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: ModelConfig,
    max_retries: u32,
}

impl OpenAiCompatClient {
    pub fn new(api: &LlmApiConfig, model: &ModelConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", api.base_url.trim_end_matches('/')),
            api_key: api.api_key.clone(),
            model: model.clone(),
            max_retries: api.max_retries,
        })
    }

    /// Override the API key (e.g. from the environment).
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }

    fn request_body(&self, prompt: &str, language: &str) -> Value {
        let mut body = json!({
            "model": self.model.name,
            "messages": [
                {"role": "system", "content": system_prompt(language)},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.model.temperature,
            "top_p": self.model.top_p,
            "max_tokens": self.model.max_tokens,
            "frequency_penalty": self.model.frequency_penalty,
            "presence_penalty": self.model.presence_penalty,
        });
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in &self.model.extra_body {
                obj.insert(k.clone(), v.clone());
            }
        }
        body
    }

    async fn call_once(&self, body: &Value) -> Result<LlmResponse, LlmError> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let raw: Value = response.json().await?;
        parse_completion(raw)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn call(&self, prompt: &str, language: &str) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(prompt, language);
        let mut attempt = 0;
        loop {
            match self.call_once(&body).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "model call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Http(_) => true,
        LlmError::Status { status, .. } => *status == 429 || *status >= 500,
        LlmError::Malformed(_) | LlmError::Other(_) => false,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Extract content, reasoning, and usage from a chat completion body.
pub fn parse_completion(raw: Value) -> Result<LlmResponse, LlmError> {
    let completion: ChatCompletion =
        serde_json::from_value(raw).map_err(|e| LlmError::Malformed(e.to_string()))?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;
    let usage = completion
        .usage
        .map(|u| TokenUsage {
            completion: u.completion_tokens,
            prompt: u.prompt_tokens,
            total: u.total_tokens,
        })
        .unwrap_or_default();
    debug!(total_tokens = usage.total, "completion parsed");
    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        reasoning: choice.message.reasoning_content,
        usage,
    })
}
