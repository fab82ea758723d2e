use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, info, warn};

use talktome_common::models::{ChannelId, InboundMessage, SentMessage};
use talktome_common::traits::ChannelHistory;

use crate::Error;
use crate::cache::{AddOutcome, MessageCache};
use crate::prompts::{CONVERSATION_PROMPT, LIMIT_REACHED_PROMPT, Prompts};
use crate::quota::QuotaEngine;
use crate::services::command_service::CommandService;
use crate::services::conversation::ConversationAssembler;

#[derive(Debug, Clone)]
pub struct MessageServiceConfig {
    /// Author name of the bot's own messages in the cache.
    pub bot_name: String,
    /// Load a channel's platform history into the cache before the first
    /// answer in that channel.
    pub backfill_history: bool,
}

/// Handles one inbound chat message: commands, caching, and replies to
/// mentions and direct messages.
pub struct MessageService {
    cache: Arc<MessageCache>,
    quota: Arc<QuotaEngine>,
    assembler: Arc<ConversationAssembler>,
    commands: Arc<CommandService>,
    prompts: Arc<Prompts>,
    history: Option<Arc<dyn ChannelHistory>>,
    /// Channels whose history has been loaded since startup.
    history_loaded: DashSet<ChannelId>,
    config: MessageServiceConfig,
}

impl MessageService {
    pub fn new(
        cache: Arc<MessageCache>,
        quota: Arc<QuotaEngine>,
        assembler: Arc<ConversationAssembler>,
        commands: Arc<CommandService>,
        prompts: Arc<Prompts>,
        config: MessageServiceConfig,
    ) -> Self {
        debug!("MessageService::new() called");
        Self {
            cache,
            quota,
            assembler,
            commands,
            prompts,
            history: None,
            history_loaded: DashSet::new(),
            config,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ChannelHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    /// Returns the reply to post in the message's channel, if any.
    ///
    /// Messages of one channel must be handled one at a time
    /// (see [`crate::services::ChannelDispatcher`]).
    pub async fn handle(&self, inbound: &InboundMessage) -> Result<Option<String>, Error> {
        if let Some(command) = self.commands.parse(&inbound.content) {
            debug!(
                "Command {:?} from {} in channel {}",
                command, inbound.author_id, inbound.channel_id
            );
            let reply = self
                .commands
                .handle(command, inbound.channel_id, inbound.author_id)
                .await?;
            return Ok(Some(reply));
        }

        if !inbound.addresses_bot() {
            self.store(inbound).await?;
            return Ok(None);
        }

        let status = self.quota.status(inbound.channel_id, Utc::now()).await?;
        if status.exceeded {
            info!(
                "Token limit reached for channel {} ({} of {})",
                inbound.channel_id, status.used, status.limit
            );
            self.store(inbound).await?;
            return Ok(Some(self.prompts.get(LIMIT_REACHED_PROMPT)?.to_string()));
        }

        if self.config.backfill_history {
            self.backfill(inbound.channel_id).await?;
        }
        self.store(inbound).await?;

        let messages = self.cache.get_ordered(inbound.channel_id);
        let system_prompt = self.prompts.get(CONVERSATION_PROMPT)?;
        let reply = self
            .assembler
            .respond(inbound.channel_id, &messages, &self.config.bot_name, system_prompt)
            .await?;

        info!(
            "Replying in channel {} ({} tokens used)",
            inbound.channel_id, reply.tokens_used
        );
        Ok(Some(reply.content))
    }

    async fn store(&self, inbound: &InboundMessage) -> Result<AddOutcome, Error> {
        self.cache
            .add(inbound.channel_id, inbound.message_id, &inbound.author_name, &inbound.content)
            .await
    }

    /// Caches what the bot posted in reply, authored as the bot, so later
    /// conversations carry it as assistant turns. Returns how many messages
    /// were stored.
    pub async fn remember_reply(
        &self,
        channel_id: ChannelId,
        sent: &[SentMessage],
    ) -> Result<usize, Error> {
        let mut stored = 0;
        for message in sent {
            let outcome = self
                .cache
                .add(channel_id, message.message_id, &self.config.bot_name, &message.content)
                .await?;
            if let AddOutcome::Inserted { .. } = outcome {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Loads the channel's recent history into the cache, once per channel.
    /// A failed load is retried on the next mention. Returns how many
    /// messages were stored.
    async fn backfill(&self, channel_id: ChannelId) -> Result<usize, Error> {
        let Some(history) = &self.history else {
            return Ok(0);
        };
        if !self.history_loaded.insert(channel_id) {
            return Ok(0);
        }

        let recent = match history.recent_messages(channel_id, self.cache.capacity()).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Could not fetch history for channel {}: {}", channel_id, e);
                self.history_loaded.remove(&channel_id);
                return Ok(0);
            }
        };

        match self.merge_history(channel_id, &recent).await {
            Ok(stored) => {
                debug!(
                    "Backfilled {} of {} messages for channel {}",
                    stored,
                    recent.len(),
                    channel_id
                );
                Ok(stored)
            }
            Err(e) => {
                self.history_loaded.remove(&channel_id);
                Err(e)
            }
        }
    }

    /// `recent` is oldest first. Messages older than the cache go in front
    /// of it, newest of them first, until the buffer is full; the rest are
    /// added as usual and dedup skips what is already cached. Discord ids
    /// grow with time, so they order the two groups.
    async fn merge_history(
        &self,
        channel_id: ChannelId,
        recent: &[InboundMessage],
    ) -> Result<usize, Error> {
        let oldest_cached = self.cache.oldest_id(channel_id);
        let (older, newer): (Vec<&InboundMessage>, Vec<&InboundMessage>) = recent
            .iter()
            .partition(|m| oldest_cached.is_some_and(|oldest| m.message_id < oldest));

        let mut stored = 0;
        for message in older.into_iter().rev() {
            let outcome = self
                .cache
                .add_oldest(channel_id, message.message_id, &message.author_name, &message.content)
                .await?;
            match outcome {
                AddOutcome::Inserted { .. } => stored += 1,
                AddOutcome::Dropped => break,
                AddOutcome::Duplicate => {}
            }
        }
        for message in newer {
            if let AddOutcome::Inserted { .. } = self.store(message).await? {
                stored += 1;
            }
        }
        Ok(stored)
    }
}
