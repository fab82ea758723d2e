//! talktome-server/src/server.rs
//!
//! Runs the bot: retention task, Discord connection and the event loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use talktome_core::Error;
use talktome_core::platforms::discord::{DiscordEvent, DiscordPlatform, SlashCommand};
use talktome_core::services::CommandService;
use talktome_core::tasks::usage_retention::spawn_usage_prune_task;

use crate::Args;
use crate::context::ServerContext;

/// Interaction responses are not cached; they never enter a conversation.
async fn answer_slash_command(
    commands: Arc<CommandService>,
    discord: Arc<DiscordPlatform>,
    command: SlashCommand,
) {
    debug!("Slash command /{} from {}", command.name, command.user_id);
    let answer = commands
        .handle_slash(&command.name, command.channel_id, command.user_id)
        .await;
    let reply = match answer {
        Ok(reply) => reply,
        Err(e) => {
            error!("Failed to answer /{}: {}", command.name, e);
            return;
        }
    };
    if let Err(e) = discord.respond_to_command(&command, &reply).await {
        error!("{}", e);
    }
}

pub async fn run_server(args: Args) -> Result<(), Error> {
    let ctx = ServerContext::new(&args).await?;
    if ctx.db.is_some() {
        info!("Token ledger: Postgres");
    }

    // First tick runs immediately, which is the startup prune.
    let prune_every = Duration::from_secs(args.prune_interval_secs);
    let prune_task = spawn_usage_prune_task(ctx.quota.clone(), prune_every);

    ctx.discord.connect().await?;
    info!("Connected to Discord as '{}'. Waiting for messages...", args.bot_name);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = ctx.discord.next_event() => match event {
                Some(DiscordEvent::Message(inbound)) => ctx.dispatcher.dispatch(inbound),
                Some(DiscordEvent::SlashCommand(command)) => {
                    let commands = ctx.commands.clone();
                    let discord = ctx.discord.clone();
                    tokio::spawn(answer_slash_command(commands, discord, command));
                }
                None => {
                    warn!("Discord event stream ended");
                    break;
                }
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down...");
                break;
            }
        }
    }

    prune_task.abort();
    ctx.discord.disconnect().await?;
    let workers = ctx.dispatcher.active_channels();
    ctx.dispatcher.shutdown().await;
    info!("Shutdown complete ({} channel workers drained)", workers);
    Ok(())
}
