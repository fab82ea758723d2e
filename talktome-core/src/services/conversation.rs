use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use talktome_common::models::{CachedMessage, ChannelId, ChatMessage, ModelReply};
use talktome_common::traits::ChatModel;

use crate::Error;
use crate::quota::QuotaEngine;

/// Turns a channel's cached history into a model conversation and books the
/// tokens of every successful reply against the channel.
pub struct ConversationAssembler {
    model: Arc<dyn ChatModel>,
    quota: Arc<QuotaEngine>,
    timeout: Option<Duration>,
}

impl ConversationAssembler {
    pub fn new(model: Arc<dyn ChatModel>, quota: Arc<QuotaEngine>) -> Self {
        Self {
            model,
            quota,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Flagged messages are left out. The bot's own messages become assistant
    /// turns; everyone else is a user turn prefixed with the author's name.
    pub fn build(messages: &[CachedMessage], bot_name: &str) -> Vec<ChatMessage> {
        messages
            .iter()
            .filter(|m| !m.flagged)
            .map(|m| {
                if m.author == bot_name {
                    ChatMessage::assistant(m.content.clone())
                } else {
                    ChatMessage::user(format!("{}: {}", m.author, m.content))
                }
            })
            .collect()
    }

    /// Usage is only recorded after the model answered. If recording fails
    /// the reply is discarded and the storage error returned.
    pub async fn respond(
        &self,
        channel_id: ChannelId,
        messages: &[CachedMessage],
        bot_name: &str,
        system_prompt: &str,
    ) -> Result<ModelReply, Error> {
        let conversation = Self::build(messages, bot_name);
        debug!(
            "Requesting reply for channel {} with {} of {} cached messages",
            channel_id,
            conversation.len(),
            messages.len()
        );

        let call = self.model.generate(&conversation, system_prompt);
        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|elapsed| {
                warn!("Model call for channel {} timed out after {:?}", channel_id, limit);
                Error::from(elapsed)
            })??,
            None => call.await?,
        };

        self.quota
            .record_usage(channel_id, reply.tokens_used, Utc::now())
            .await?;
        Ok(reply)
    }
}
