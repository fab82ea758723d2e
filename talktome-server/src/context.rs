//! talktome-server/src/context.rs
//!
//! Builds the shared state the server runs on.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use talktome_ai::{OpenAIProvider, Provider, ProviderConfig, ProviderKind};
use talktome_common::traits::{ChannelHistory, QuotaLedger, ReplySink};
use talktome_core::Error;
use talktome_core::cache::MessageCache;
use talktome_core::db::Database;
use talktome_core::moderation::ModerationGate;
use talktome_core::platforms::discord::DiscordPlatform;
use talktome_core::prompts::Prompts;
use talktome_core::quota::{QuotaEngine, QuotaPolicy};
use talktome_core::repositories::InMemoryQuotaLedger;
use talktome_core::services::{
    ChannelDispatcher, CommandService, ConversationAssembler, MessageService, MessageServiceConfig,
};

use crate::Args;

/// Everything the event loop needs, created once at startup.
pub struct ServerContext {
    pub db: Option<Database>,
    pub quota: Arc<QuotaEngine>,
    pub commands: Arc<CommandService>,
    pub discord: Arc<DiscordPlatform>,
    pub dispatcher: Arc<ChannelDispatcher>,
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ServerContext {
    pub async fn new(args: &Args) -> Result<Self, Error> {
        let prompts = Arc::new(Prompts::from_path(&args.prompts_path)?);

        let (db, ledger): (Option<Database>, Arc<dyn QuotaLedger>) = if args.in_memory_ledger {
            info!("Using in-memory token ledger; usage is not persisted");
            (None, Arc::new(InMemoryQuotaLedger::new()))
        } else {
            let db = Database::connect(&args.database_url, args.db_max_connections).await?;
            db.migrate().await?;
            let ledger = Arc::new(db.quota_ledger());
            (Some(db), ledger)
        };
        let quota = Arc::new(QuotaEngine::new(ledger, QuotaPolicy::new(args.token_usage_limit)));

        let moderation = Arc::new(OpenAIProvider::new(ProviderConfig::new(
            ProviderKind::OpenAI,
            args.openai_api_key.clone(),
        )));
        let mut gate = ModerationGate::new(moderation);
        if let Some(limit) = timeout_from_secs(args.moderation_timeout_secs) {
            gate = gate.with_timeout(limit);
        }
        let cache = Arc::new(MessageCache::new(args.history_limit, Arc::new(gate)));

        let kind: ProviderKind = args.model_provider.parse()?;
        let api_key = match kind {
            ProviderKind::OpenAI => args.openai_api_key.clone(),
            ProviderKind::Anthropic => args
                .anthropic_api_key
                .clone()
                .ok_or_else(|| {
                    Error::Config("ANTHROPIC_API_KEY is required for the anthropic provider".into())
                })?,
        };
        let mut model_config = ProviderConfig::new(kind, api_key);
        if let Some(model) = &args.model {
            model_config = model_config.with_model(model.clone());
        }
        info!("Chat model: {} ({})", model_config.default_model, kind);
        let model = Provider::create_chat_model(model_config);

        let mut assembler = ConversationAssembler::new(model, quota.clone());
        if let Some(limit) = timeout_from_secs(args.model_timeout_secs) {
            assembler = assembler.with_timeout(limit);
        }

        let commands = Arc::new(CommandService::new(
            quota.clone(),
            prompts.clone(),
            &args.bot_name,
            args.power_user_ids.0.iter().copied(),
        ));

        let mut discord = DiscordPlatform::new(args.discord_token.clone(), args.bot_name.clone());
        if let Some(guild_id) = args.command_guild_id {
            discord = discord.with_command_guild(guild_id)?;
        }
        let discord = Arc::new(discord);

        let config = MessageServiceConfig {
            bot_name: args.bot_name.clone(),
            backfill_history: !args.no_history_backfill,
        };
        let mut message_service = MessageService::new(
            cache,
            quota.clone(),
            Arc::new(assembler),
            commands.clone(),
            prompts,
            config,
        );
        if !args.no_history_backfill {
            let history: Arc<dyn ChannelHistory> = discord.clone();
            message_service = message_service.with_history(history);
        }

        let sink: Arc<dyn ReplySink> = discord.clone();
        let dispatcher = Arc::new(ChannelDispatcher::new(Arc::new(message_service), sink));

        Ok(Self {
            db,
            quota,
            commands,
            discord,
            dispatcher,
        })
    }
}
