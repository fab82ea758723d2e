use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, MessageId};

/// Single cached chat message. The moderation verdict is taken once, when the
/// message enters the cache, and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub id: MessageId,
    pub content: String,
    pub author: String,
    pub flagged: bool,
}

/// A chat message as handed over by a platform adapter. Mentions in `content`
/// are already resolved to display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    /// The bot user was mentioned.
    pub mentions_bot: bool,
    /// Direct message channel (no guild).
    pub is_direct: bool,
}

impl InboundMessage {
    /// Whether this message asks the bot for an answer.
    pub fn addresses_bot(&self) -> bool {
        self.mentions_bot || self.is_direct
    }
}

/// A message the bot posted, as the platform stored it. Long replies are
/// split, so one reply can produce several of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub content: String,
}
