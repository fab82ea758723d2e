use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use talktome_common::Error;

/// Which backend serves chat completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
}

impl ProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-20241022",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(Error::Config(format!("Unknown model provider: {}", other))),
        }
    }
}

/// Configuration for an AI provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderKind,

    /// Base URL for API requests; the provider's public endpoint when unset.
    pub api_base: Option<String>,

    pub api_key: String,

    pub default_model: String,

    /// Upper bound on completion tokens per request.
    pub max_tokens: u32,

    /// Additional provider-specific options, e.g. `moderation_model`.
    pub options: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider_type,
            api_base: None,
            api_key: api_key.into(),
            default_model: provider_type.default_model().to_string(),
            max_tokens: 1000,
            options: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(|| self.provider_type.default_api_base().to_string())
            .trim_end_matches('/')
            .to_string()
    }
}
