use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, error};

use talktome_common::Error;
use talktome_common::models::ai::{ChatMessage, ChatRole, ModelReply};
use talktome_common::traits::{ChatModel, ModerationService};

use crate::models::{ProviderConfig, ProviderKind};

/// Reads a provider response body as JSON.
///
/// 429 and 5xx mean the provider is unavailable right now. Any other non-2xx
/// status means it rejected the request, which is a response problem rather
/// than an availability one.
async fn read_json(provider: &str, response: Response) -> Result<Value, Error> {
    let status = response.status();
    let response_text = response.text().await?;

    if !status.is_success() {
        error!("{} returned {}: {}", provider, status, response_text);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::ProviderUnavailable(format!("{} returned {}", provider, status)));
        }
        return Err(Error::ProviderResponse(format!(
            "{} rejected the request with {}: {}",
            provider, status, response_text
        )));
    }

    debug!("Raw {} response: {}", provider, response_text);
    let data = serde_json::from_str::<Value>(&response_text).map_err(|e| {
        error!("Failed to parse {} response as JSON: {:?}", provider, e);
        Error::ProviderResponse(format!("{} returned non-JSON response: {}", provider, e))
    })?;

    if let Some(err) = data.get("error") {
        let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("Unknown error");
        return Err(Error::ProviderResponse(format!("{} API error: {}", provider, message)));
    }

    Ok(data)
}

/// OpenAI provider: chat completions and the moderation endpoint.
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::new();
        Self { config, client }
    }

    fn chat_payload(&self, messages: &[ChatMessage], system_prompt: &str) -> Value {
        let mut all_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            all_messages.push(json!({
                "role": ChatRole::System.as_str(),
                "content": system_prompt
            }));
        }
        all_messages.extend(messages.iter().map(|msg| {
            json!({
                "role": msg.role.as_str(),
                "content": msg.content
            })
        }));

        json!({
            "model": self.config.default_model,
            "messages": all_messages,
            "max_tokens": self.config.max_tokens,
        })
    }

    fn moderation_payload(&self, text: &str) -> Value {
        let mut payload = json!({ "input": text });
        if let Some(model) = self.config.options.get("moderation_model") {
            payload["model"] = json!(model);
        }
        payload
    }
}

#[async_trait]
impl ChatModel for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<ModelReply, Error> {
        let api_base = self.config.api_base();
        let request_payload = self.chat_payload(messages, system_prompt);

        debug!(
            "Making API call to {}/chat/completions with {} messages",
            api_base,
            messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", api_base))
            .bearer_auth(&self.config.api_key)
            .json(&request_payload)
            .send()
            .await?;

        let data = read_json("openai", response).await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                error!("Response missing choices[0].message.content: {:?}", data);
                Error::ProviderResponse("Response missing 'choices[0].message.content'".into())
            })?
            .to_string();

        let tokens_used = data
            .pointer("/usage/total_tokens")
            .and_then(|t| t.as_i64())
            .unwrap_or(0);

        Ok(ModelReply { content, tokens_used })
    }
}

#[async_trait]
impl ModerationService for OpenAIProvider {
    async fn classify(&self, text: &str) -> Result<bool, Error> {
        let response = self
            .client
            .post(format!("{}/moderations", self.config.api_base()))
            .bearer_auth(&self.config.api_key)
            .json(&self.moderation_payload(text))
            .send()
            .await?;

        let data = read_json("openai moderation", response).await?;

        data.pointer("/results/0/flagged")
            .and_then(|f| f.as_bool())
            .ok_or_else(|| {
                Error::ProviderResponse("Moderation response missing 'results[0].flagged'".into())
            })
    }
}

/// Anthropic provider using the messages API.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::new();
        Self { config, client }
    }

    /// The messages API wants the conversation to open with a user turn, so
    /// leading assistant turns are dropped. System text goes in its own field.
    fn chat_payload(&self, messages: &[ChatMessage], system_prompt: &str) -> Value {
        let formatted_messages: Vec<Value> = messages
            .iter()
            .skip_while(|msg| msg.role != ChatRole::User)
            .filter(|msg| msg.role != ChatRole::System)
            .map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            })
            .collect();

        let mut request = json!({
            "model": self.config.default_model,
            "messages": formatted_messages,
            "max_tokens": self.config.max_tokens,
        });
        if !system_prompt.is_empty() {
            request["system"] = json!(system_prompt);
        }
        request
    }
}

#[async_trait]
impl ChatModel for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<ModelReply, Error> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.api_base()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.chat_payload(messages, system_prompt))
            .send()
            .await?;

        let data = read_json("anthropic", response).await?;

        let blocks = data["content"]
            .as_array()
            .ok_or_else(|| Error::ProviderResponse("Response missing 'content' array".into()))?;

        let content = blocks
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        let usage = &data["usage"];
        let input_tokens = usage["input_tokens"].as_i64().unwrap_or(0);
        let output_tokens = usage["output_tokens"].as_i64().unwrap_or(0);
        let tokens_used = input_tokens + output_tokens;

        Ok(ModelReply { content, tokens_used })
    }
}

/// Factory for creating AI providers
pub struct Provider;

impl Provider {
    pub fn create_openai(config: ProviderConfig) -> OpenAIProvider {
        OpenAIProvider::new(config)
    }

    pub fn create_anthropic(config: ProviderConfig) -> AnthropicProvider {
        AnthropicProvider::new(config)
    }

    /// Chat backend selected by `config.provider_type`.
    pub fn create_chat_model(config: ProviderConfig) -> Arc<dyn ChatModel> {
        match config.provider_type {
            ProviderKind::OpenAI => Arc::new(Self::create_openai(config)),
            ProviderKind::Anthropic => Arc::new(Self::create_anthropic(config)),
        }
    }
}
