use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use twilight_gateway::{
    self as gateway, CloseFrame, Config, Event, EventTypeFlags, Intents, MessageSender, Shard,
    StreamExt,
};
use twilight_http::Client as HttpClient;
use twilight_http::client::ClientBuilder;
use twilight_model::application::command::{Command, CommandType};
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::channel::Message;
use twilight_model::http::interaction::{
    InteractionResponse, InteractionResponseData, InteractionResponseType,
};
use twilight_model::id::Id;
use twilight_model::id::marker::{
    ApplicationMarker, ChannelMarker, GuildMarker, InteractionMarker, UserMarker,
};
use twilight_util::builder::command::CommandBuilder;

use talktome_common::models::{ChannelId, InboundMessage, MessageId, SentMessage};
use talktome_common::traits::{ChannelHistory, ReplySink};

use crate::Error;
use crate::platforms::discord::content::{MAX_MESSAGE_LEN, resolve_mentions, split_message};
use crate::services::command_service::TOKEN_USAGE_SLASH_COMMAND;

/// Discord caps a single history request at this many messages.
const MAX_HISTORY_FETCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

/// What the gateway hands to the event loop.
#[derive(Debug, Clone)]
pub enum DiscordEvent {
    Message(InboundMessage),
    SlashCommand(SlashCommand),
}

/// One application command invocation. Answered once, through
/// [`DiscordPlatform::respond_to_command`].
#[derive(Debug, Clone)]
pub struct SlashCommand {
    pub name: String,
    /// `None` when the interaction carries no channel.
    pub channel_id: Option<ChannelId>,
    pub user_id: u64,
    application_id: Id<ApplicationMarker>,
    interaction_id: Id<InteractionMarker>,
    token: String,
}

impl SlashCommand {
    fn from_interaction(interaction: &Interaction) -> Option<Self> {
        let Some(InteractionData::ApplicationCommand(data)) = &interaction.data else {
            return None;
        };
        Some(Self {
            name: data.name.clone(),
            channel_id: interaction
                .channel
                .as_ref()
                .and_then(|channel| ChannelId::new(channel.id.get()).ok()),
            user_id: interaction.author_id().map(|id| id.get()).unwrap_or_default(),
            application_id: interaction.application_id,
            interaction_id: interaction.id,
            token: interaction.token.clone(),
        })
    }
}

/// `/token_usage`, answered like the `token_usage` text command.
pub fn token_usage_command() -> Command {
    CommandBuilder::new(
        TOKEN_USAGE_SLASH_COMMAND,
        "Get the token usage for the current channel",
        CommandType::ChatInput,
    )
    .build()
}

/// Registers the bot's slash commands on `guild`, or globally without one.
/// Replaces whatever was registered before.
async fn register_slash_commands(
    http: &HttpClient,
    application_id: Id<ApplicationMarker>,
    guild: Option<Id<GuildMarker>>,
) -> Result<(), Error> {
    let commands = [token_usage_command()];
    let interaction = http.interaction(application_id);
    match guild {
        Some(guild_id) => interaction.set_guild_commands(guild_id, &commands).await,
        None => interaction.set_global_commands(&commands).await,
    }
    .map_err(|e| Error::Platform(format!("Failed to register slash commands: {e}")))?;
    Ok(())
}

/// Server nickname, then global display name, then username. Mention
/// payloads carry no global display name, so mentions pass `None` for it.
fn display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}

/// Who the bot is. The user id is only known once the gateway sends READY.
struct BotIdentity {
    user_id: RwLock<Option<Id<UserMarker>>>,
    /// Configured name used as the author of the bot's own messages, so the
    /// conversation builder can tell them apart from everyone else's.
    name: String,
}

impl BotIdentity {
    fn is_self(&self, author: Id<UserMarker>) -> bool {
        *self.user_id.read() == Some(author)
    }

    fn to_inbound(&self, msg: &Message) -> Result<InboundMessage, Error> {
        let bot_id = *self.user_id.read();
        let from_self = bot_id == Some(msg.author.id);

        let author_name = if from_self {
            self.name.clone()
        } else {
            display_name(
                msg.member.as_ref().and_then(|m| m.nick.as_deref()),
                msg.author.global_name.as_deref(),
                &msg.author.name,
            )
        };

        let names: Vec<(u64, String)> = msg
            .mentions
            .iter()
            .map(|m| {
                let nick = m.member.as_ref().and_then(|member| member.nick.as_deref());
                (m.id.get(), display_name(nick, None, &m.name))
            })
            .collect();

        Ok(InboundMessage {
            channel_id: ChannelId::new(msg.channel_id.get())?,
            message_id: MessageId::new(msg.id.get())?,
            author_id: msg.author.id.get(),
            author_name,
            content: resolve_mentions(&msg.content, &names),
            mentions_bot: bot_id.is_some_and(|id| msg.mentions.iter().any(|m| m.id == id)),
            is_direct: msg.guild_id.is_none(),
        })
    }
}

/// Reads gateway events for one shard and forwards chat messages and slash
/// commands to `tx`. Shard 0 registers the slash commands on READY.
async fn shard_runner(
    mut shard: Shard,
    tx: UnboundedSender<DiscordEvent>,
    identity: Arc<BotIdentity>,
    http: Arc<HttpClient>,
    command_guild: Option<Id<GuildMarker>>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let forward = match item {
            Ok(Event::Ready(ready)) => {
                info!("Shard {shard_id} => READY as {} (ID={})", ready.user.name, ready.user.id);
                *identity.user_id.write() = Some(ready.user.id);

                if shard_id == 0 {
                    let http = Arc::clone(&http);
                    let application_id = ready.application.id;
                    tokio::spawn(async move {
                        match register_slash_commands(&http, application_id, command_guild).await {
                            Ok(()) => info!("Registered slash commands"),
                            Err(e) => error!("{e}"),
                        }
                    });
                }
                None
            }
            Ok(Event::MessageCreate(msg_create)) => {
                let msg: &Message = &msg_create.0;
                if identity.is_self(msg.author.id) {
                    trace!("Ignoring own message {}", msg.id);
                    continue;
                }
                match identity.to_inbound(msg) {
                    Ok(inbound) => Some(DiscordEvent::Message(inbound)),
                    Err(e) => {
                        error!("Shard {shard_id} => could not convert message {}: {e}", msg.id);
                        None
                    }
                }
            }
            Ok(Event::InteractionCreate(interaction)) => {
                SlashCommand::from_interaction(&interaction.0).map(DiscordEvent::SlashCommand)
            }
            Ok(event) => {
                trace!("Shard {shard_id} => unhandled event: {:?}", event.kind());
                None
            }
            Err(err) => {
                error!("Shard {shard_id} => error receiving event: {err:?}");
                None
            }
        };

        if let Some(event) = forward {
            if tx.send(event).is_err() {
                warn!("Shard {shard_id} => receiver dropped, stopping");
                break;
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

#[derive(Default)]
struct Shards {
    tasks: Vec<JoinHandle<()>>,
    senders: Vec<MessageSender>,
}

/// Gateway connection plus REST client for one bot account. Shared behind an
/// `Arc`: it is the event source, the reply sink and the history reader.
pub struct DiscordPlatform {
    token: String,
    http: Arc<HttpClient>,
    identity: Arc<BotIdentity>,
    command_guild: Option<Id<GuildMarker>>,
    connection_status: parking_lot::Mutex<ConnectionStatus>,
    rx: Mutex<Option<UnboundedReceiver<DiscordEvent>>>,
    shards: Mutex<Shards>,
}

impl DiscordPlatform {
    pub fn new(token: String, bot_name: String) -> Self {
        let http = Arc::new(
            ClientBuilder::new()
                .token(token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );
        Self {
            token,
            http,
            identity: Arc::new(BotIdentity {
                user_id: RwLock::new(None),
                name: bot_name,
            }),
            command_guild: None,
            connection_status: parking_lot::Mutex::new(ConnectionStatus::Disconnected),
            rx: Mutex::new(None),
            shards: Mutex::new(Shards::default()),
        }
    }

    /// Registers slash commands on this guild only instead of globally.
    pub fn with_command_guild(mut self, guild_id: u64) -> Result<Self, Error> {
        let guild = Id::new_checked(guild_id)
            .ok_or_else(|| Error::Validation(format!("invalid guild id: {guild_id}")))?;
        self.command_guild = Some(guild);
        Ok(self)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection_status.lock()
    }

    /// Waits for the next chat message or slash command. `None` once
    /// disconnected.
    pub async fn next_event(&self) -> Option<DiscordEvent> {
        let mut guard = self.rx.lock().await;
        match guard.as_mut() {
            Some(r) => r.recv().await,
            None => None,
        }
    }

    pub async fn connect(&self) -> Result<(), Error> {
        if self.connection_status() == ConnectionStatus::Connected {
            info!("(DiscordPlatform) Already connected => skipping");
            return Ok(());
        }
        if self.token.is_empty() {
            return Err(Error::Config("Discord token is empty".into()));
        }

        let (tx, rx) = unbounded_channel::<DiscordEvent>();
        {
            let mut guard = self.rx.lock().await;
            *guard = Some(rx);
        }

        let config = Config::new(
            self.token.clone(),
            Intents::GUILDS
                | Intents::GUILD_MESSAGES
                | Intents::DIRECT_MESSAGES
                | Intents::MESSAGE_CONTENT,
        );

        let created = gateway::create_recommended(&self.http, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?;

        let mut shards = self.shards.lock().await;
        for shard in created {
            shards.senders.push(shard.sender());

            let runner = shard_runner(
                shard,
                tx.clone(),
                Arc::clone(&self.identity),
                Arc::clone(&self.http),
                self.command_guild,
            );
            shards.tasks.push(tokio::spawn(runner));
        }
        info!("(DiscordPlatform) Started {} shard(s)", shards.tasks.len());

        *self.connection_status.lock() = ConnectionStatus::Connected;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        *self.connection_status.lock() = ConnectionStatus::Disconnected;

        let mut shards = self.shards.lock().await;
        for sender in &shards.senders {
            if let Err(e) = sender.close(CloseFrame::NORMAL) {
                debug!("Shard already closed: {e:?}");
            }
        }
        for task in shards.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Shard task ended abnormally: {e:?}");
            }
        }
        shards.senders.clear();

        {
            let mut guard = self.rx.lock().await;
            *guard = None;
        }
        info!("(DiscordPlatform) Disconnected");
        Ok(())
    }

    /// Answers a slash command with a visible message. Interaction responses
    /// hold a single message, so longer text is cut at the first chunk.
    pub async fn respond_to_command(
        &self,
        command: &SlashCommand,
        text: &str,
    ) -> Result<(), Error> {
        let content = split_message(text, MAX_MESSAGE_LEN)
            .into_iter()
            .next()
            .unwrap_or_default();

        self.http
            .interaction(command.application_id)
            .create_response(
                command.interaction_id,
                &command.token,
                &InteractionResponse {
                    kind: InteractionResponseType::ChannelMessageWithSource,
                    data: Some(InteractionResponseData {
                        content: Some(content),
                        ..Default::default()
                    }),
                },
            )
            .await
            .map_err(|e| {
                Error::Platform(format!("Error responding to /{}: {e}", command.name))
            })?;
        Ok(())
    }
}

fn channel_marker(channel_id: ChannelId) -> Result<Id<ChannelMarker>, Error> {
    Id::new_checked(channel_id.get())
        .ok_or_else(|| Error::Validation(format!("invalid channel id: {channel_id}")))
}

#[async_trait]
impl ReplySink for DiscordPlatform {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        text: &str,
    ) -> Result<Vec<SentMessage>, Error> {
        let channel = channel_marker(channel_id)?;
        let mut sent = Vec::new();
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let message = self
                .http
                .create_message(channel)
                .content(&chunk)
                .await
                .map_err(|e| Error::Platform(format!("Error sending Discord message: {e:?}")))?
                .model()
                .await
                .map_err(|e| Error::Platform(format!("Error parsing sent message: {e:?}")))?;
            sent.push(SentMessage {
                message_id: MessageId::new(message.id.get())?,
                content: chunk,
            });
        }
        Ok(sent)
    }
}

#[async_trait]
impl ChannelHistory for DiscordPlatform {
    async fn recent_messages(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, Error> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let channel = channel_marker(channel_id)?;
        let limit = limit.min(MAX_HISTORY_FETCH) as u16;

        let response = self
            .http
            .channel_messages(channel)
            .limit(limit)
            .await
            .map_err(|e| Error::Platform(format!("Error fetching Discord history: {e:?}")))?;
        let messages = response
            .models()
            .await
            .map_err(|e| Error::Platform(format!("Error parsing Discord history: {e:?}")))?;

        // Discord returns newest first.
        let mut inbound = Vec::with_capacity(messages.len());
        for msg in messages.iter().rev() {
            match self.identity.to_inbound(msg) {
                Ok(m) => inbound.push(m),
                Err(e) => warn!("Skipping history message {}: {e}", msg.id),
            }
        }
        debug!("Fetched {} history messages for channel {}", inbound.len(), channel_id);
        Ok(inbound)
    }
}
