//! Chat-completion client for OpenAI-compatible endpoints.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ModelConfig, REQUEST_TIMEOUT};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no model credential configured")]
    MissingCredential,

    #[error("model rejected the credential (HTTP {0})")]
    Auth(u16),

    #[error("model rate limited the request")]
    RateLimited,

    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request to model failed: {0}")]
    Transport(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Short category name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::MissingCredential => "missing_credential",
            LlmError::Auth(_) => "auth",
            LlmError::RateLimited => "rate_limited",
            LlmError::Status { .. } => "status",
            LlmError::Transport(_) => "transport",
            LlmError::MalformedResponse(_) => "malformed_response",
            LlmError::Config(_) => "config",
        }
    }
}

/// A language model that answers a single user prompt.
#[allow(async_fn_in_trait)]
pub trait ChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingCredential);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

impl ChatModel for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Sending {} char prompt to {}", prompt.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        match status {
            200..=299 => {}
            401 | 403 => return Err(LlmError::Auth(status)),
            429 => return Err(LlmError::RateLimited),
            _ => {
                return Err(LlmError::Status {
                    status,
                    body: body.chars().take(200).collect(),
                })
            }
        }

        reply_content(&body)
    }
}

/// Pull `choices[0].message.content` out of a chat-completion body.
fn reply_content(body: &str) -> Result<String, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::MalformedResponse("no message content in choices".to_string()))
}
