//! OpenAI-compatible chat client.
//!
//! Implements the single operation the research agents need: one
//! system+user chat turn, optionally forced into JSON mode, returning the
//! raw assistant text. Works against any endpoint speaking the OpenAI
//! chat-completions wire format (OpenAI itself, DashScope compatible mode,
//! vLLM, and friends).

use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call options for a chat request.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Force `response_format: json_object`.
    pub json_mode: bool,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum completion tokens.
    pub max_tokens: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            json_mode: true,
            temperature: 0.3,
            max_tokens: 16000,
        }
    }
}

impl ChatOptions {
    /// Options for free-form text output.
    pub fn text() -> Self {
        Self {
            json_mode: false,
            ..Default::default()
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A single-shot chat-completion client.
///
/// The trait is the seam the agents depend on; tests substitute scripted
/// implementations.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run one system+user chat turn and return the assistant text.
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String>;
}

/// Chat client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    config: LlmConfig,
    client: Client,
}

impl OpenAiCompatClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::HttpError)?;

        Ok(Self { config, client })
    }

    async fn chat_once(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let req_body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user.to_string()),
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&req_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::HttpError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationError(error_text),
                429 => LlmError::RateLimitExceeded(error_text),
                _ => LlmError::ProviderError(format!("API error {}: {}", status, error_text)),
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in completion".to_string()))?;

        debug!(model = %self.config.model, len = content.len(), "chat completion received");

        Ok(content)
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.chat_once(system, user, options).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let jitter_ms = rand::thread_rng().gen_range(0..250);
                    let backoff = Duration::from_millis(500 * u64::from(attempt) + jitter_ms);
                    warn!(attempt, error = %e, "chat call failed, retrying after {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// OpenAI chat-completions wire types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
