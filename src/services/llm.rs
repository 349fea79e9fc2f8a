use crate::core::config::ApiConfig;
use crate::core::error::ApiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Rough token count used for rate-limit accounting before the call.
    pub fn estimated_units(&self) -> u64 {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        (chars / 4) as u64 + self.max_tokens as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub input_units: u64,
    pub output_units: u64,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync + Debug {
    async fn complete(&self, request: &GenerationRequest) -> Result<GenerationResponse, ApiError>;
}

// --- MiniMax ---

#[derive(Debug)]
pub struct MiniMaxChatClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl MiniMaxChatClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    base_resp: Option<BaseResp>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize, Debug)]
pub(crate) struct BaseResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: String,
}

impl BaseResp {
    pub(crate) fn check(&self) -> Result<(), ApiError> {
        match ApiError::from_base_resp(self.status_code, &self.status_msg) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub(crate) fn parse_chat_response(body: &str) -> Result<GenerationResponse, ApiError> {
    let result: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ApiError::malformed(format!("Failed to parse chat response: {}. Body: {}", e, body))
    })?;

    if let Some(base) = &result.base_resp {
        base.check()?;
    }

    let choice = result
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| {
            ApiError::malformed(format!("Chat response has no choices. Body: {}", body))
        })?;
    let message = choice
        .message
        .ok_or_else(|| ApiError::malformed("Chat response choice has no message"))?;

    let (input_units, output_units) = result
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(GenerationResponse {
        content: message.content.unwrap_or_default(),
        reasoning: message.reasoning_content,
        finish_reason: choice.finish_reason,
        input_units,
        output_units,
    })
}

#[async_trait]
impl GenerationBackend for MiniMaxChatClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<GenerationResponse, ApiError> {
        let url = format!("{}/v1/text/chatcompletion_v2", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status, &text));
        }
        debug!("Chat response: {} bytes", text.len());

        parse_chat_response(&text)
    }
}
