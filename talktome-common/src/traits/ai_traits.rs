use async_trait::async_trait;

use crate::error::Error;
use crate::models::ai::{ChatMessage, ModelReply};

/// A chat completion backend. Failures are surfaced to the caller and never
/// retried here.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// `messages` is the conversation oldest first, without the system prompt.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
    ) -> Result<ModelReply, Error>;
}

/// Content-policy classifier. `true` means the text violates policy.
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn classify(&self, text: &str) -> Result<bool, Error>;
}
