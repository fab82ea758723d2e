// File: talktome-core/src/test_utils/fixtures.rs

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use talktome_common::models::{ChannelId, InboundMessage, MessageId, SentMessage};
use talktome_common::traits::ReplySink;

use crate::Error;

/// Builds an inbound guild message that does not mention the bot.
pub fn inbound(channel: u64, id: u64, author: &str, content: &str) -> InboundMessage {
    InboundMessage {
        channel_id: ChannelId::new(channel).unwrap_or_else(|e| panic!("test channel id: {e}")),
        message_id: MessageId::new(id).unwrap_or_else(|e| panic!("test message id: {e}")),
        author_id: 1000 + id,
        author_name: author.to_string(),
        content: content.to_string(),
        mentions_bot: false,
        is_direct: false,
    }
}

/// Same as [`inbound`], but mentioning the bot.
pub fn mention(channel: u64, id: u64, author: &str, content: &str) -> InboundMessage {
    InboundMessage {
        mentions_bot: true,
        ..inbound(channel, id, author, content)
    }
}

/// Ids handed out by [`RecordingSink`] start here, clear of fixture ids.
pub const FIRST_SENT_ID: u64 = 1_000_000;

/// Reply sink that keeps everything sent to it.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ChannelId, String)>>,
    next_id: AtomicU64,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Vec<SentMessage>, Error> {
        let offset = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message_id = MessageId::new(FIRST_SENT_ID + offset)?;
        self.sent.lock().push((channel_id, text.to_string()));
        Ok(vec![SentMessage {
            message_id,
            content: text.to_string(),
        }])
    }
}
