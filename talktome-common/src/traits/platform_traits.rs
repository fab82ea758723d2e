use async_trait::async_trait;

use crate::error::Error;
use crate::models::cache::{InboundMessage, SentMessage};
use crate::models::channel::ChannelId;

/// Read access to a channel's past messages on the chat platform.
#[async_trait]
pub trait ChannelHistory: Send + Sync {
    /// Up to `limit` most recent messages, oldest first.
    async fn recent_messages(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, Error>;
}

/// Where replies go.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Posts `text`, split as the platform requires. Returns the posted
    /// messages in order.
    async fn send_message(
        &self,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Vec<SentMessage>, Error>;
}
