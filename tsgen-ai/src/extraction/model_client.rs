//! Language model client
//!
//! The engine talks to the model through `ModelClient`; `OpenAiClient`
//! implements it against an OpenAI-compatible chat completions endpoint
//! with JSON response mode. No retries happen at this layer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use tsgen_common::config::ModelConfig;

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub section_prompt: String,
    /// Full rendered source context
    pub source_text: String,
}

impl ModelRequest {
    /// User message: section instructions followed by every source document
    pub fn user_message(&self) -> String {
        format!(
            "{}\n\nSOURCE DOCUMENTS:\n\n{}",
            self.section_prompt, self.source_text
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// Raw response text, expected to be a JSON object
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,

    #[error("model client not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Model identifier for logs and execution records
    fn model_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self, ModelError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            timeout,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_message() },
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| self.map_error(e))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)?;

        let (input_tokens, output_tokens) = completion
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        debug!(
            model = %self.model,
            input_tokens,
            output_tokens,
            "Model call completed"
        );

        Ok(ModelResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
