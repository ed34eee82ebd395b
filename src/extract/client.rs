use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("service error: {0}")]
    Api(String),
    #[error("unparseable response: {0}")]
    Parse(String),
}

/// A chat model that answers with a JSON document.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, ExtractError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (DeepSeek by default).
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn request<'a>(&'a self, system: &'a str, user: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Message { role: "system", content: system },
                Message { role: "user", content: user },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        }
    }
}

#[async_trait]
impl ExtractionClient for ChatClient {
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, ExtractError> {
        let start = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request(system, user))
            .send()
            .await
            .map_err(|e| transport_error(e, ExtractError::Network))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Extraction service returned {}: {}", status, text);
            return Err(ExtractError::Api(format!("{}: {}", status, text)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, ExtractError::Parse))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractError::Api("empty completion".into()))?;

        debug!(
            "Completion from {} in {}ms",
            self.model,
            start.elapsed().as_millis()
        );
        parse_content(&content)
    }
}

/// Timeouts are reported as such whether they hit while sending or while
/// reading the body; everything else goes through `otherwise`.
fn transport_error(e: reqwest::Error, otherwise: fn(String) -> ExtractError) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout
    } else {
        otherwise(e.to_string())
    }
}

/// Parse a completion body as JSON, tolerating a surrounding Markdown fence.
pub fn parse_content(content: &str) -> Result<Value, ExtractError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| ExtractError::Parse(e.to_string()))
}
