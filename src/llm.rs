//! Chat-completion backends.
//!
//! - **[`DisabledModel`]**: always fails, so ask turns answer with the
//!   extractive fallback built from retrieved chunks.
//! - **[`OpenAiChatModel`]**: `POST {base_url}/chat/completions` on any
//!   OpenAI-compatible server, with the shared retry policy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use docqa_core::error::CoreError;
use docqa_core::llm::{ChatMessage, LanguageModel};

use crate::config::LlmConfig;
use crate::retry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build the chat model named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> docqa_core::Result<String> {
        Err(CoreError::Llm("llm provider is disabled".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat client. Requires `OPENAI_API_KEY`.
pub struct OpenAiChatModel {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Result<serde_json::Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
        };
        Ok(serde_json::to_value(request)?)
    }
}

/// First choice's text, or empty if the server sent none.
fn parse_chat_response(json: serde_json::Value) -> Result<String> {
    let response: ChatResponse = serde_json::from_value(json)?;
    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> docqa_core::Result<String> {
        let to_core = |e: anyhow::Error| CoreError::Llm(format!("{:#}", e));
        let body = self.request_body(messages).map_err(to_core)?;
        let json = retry::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI chat",
        )
        .await
        .map_err(to_core)?;
        parse_chat_response(json).map_err(to_core)
    }
}
