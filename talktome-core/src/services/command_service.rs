use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use talktome_common::models::ChannelId;

use crate::Error;
use crate::prompts::{NOT_AUTHORIZED_PROMPT, Prompts};
use crate::quota::QuotaEngine;

/// Rows shown by `db_token_usage`, newest first. Keeps the reply well under
/// Discord's message size limit.
const MAX_LISTED_RECORDS: usize = 20;

/// Name of the slash command answering like `token_usage`.
pub const TOKEN_USAGE_SLASH_COMMAND: &str = "token_usage";

/// Quota administration commands, written as `!{bot_name}_{command}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaCommand {
    TokenUsage,
    DbTokenUsage,
    ResetTokenUsage,
    /// Raw argument, validated when the command runs.
    SetTokenLimit(Option<String>),
    GetTokenLimit,
    DeleteTokenLimit,
}

impl QuotaCommand {
    /// Only `token_usage` is open to everyone.
    pub fn requires_power_user(&self) -> bool {
        !matches!(self, QuotaCommand::TokenUsage)
    }
}

pub struct CommandService {
    quota: Arc<QuotaEngine>,
    prompts: Arc<Prompts>,
    power_users: HashSet<u64>,
    prefix: String,
}

impl CommandService {
    pub fn new(
        quota: Arc<QuotaEngine>,
        prompts: Arc<Prompts>,
        bot_name: &str,
        power_users: impl IntoIterator<Item = u64>,
    ) -> Self {
        let power_users: HashSet<u64> = power_users.into_iter().collect();
        debug!("Initializing CommandService with {} power users", power_users.len());
        Self {
            quota,
            prompts,
            power_users,
            prefix: format!("!{}_", bot_name),
        }
    }

    pub fn is_power_user(&self, user_id: u64) -> bool {
        self.power_users.contains(&user_id)
    }

    /// `None` when the text is not one of our commands.
    pub fn parse(&self, text: &str) -> Option<QuotaCommand> {
        let rest = text.trim().strip_prefix(&self.prefix)?;
        let mut parts = rest.split_whitespace();
        let command = match parts.next()? {
            "token_usage" => QuotaCommand::TokenUsage,
            "db_token_usage" => QuotaCommand::DbTokenUsage,
            "reset_token_usage" => QuotaCommand::ResetTokenUsage,
            "set_token_limit" => QuotaCommand::SetTokenLimit(parts.next().map(str::to_string)),
            "get_token_limit" => QuotaCommand::GetTokenLimit,
            "delete_token_limit" => QuotaCommand::DeleteTokenLimit,
            _ => return None,
        };
        Some(command)
    }

    /// Answers an application (slash) command. `channel_id` is `None` when
    /// the interaction carries no channel.
    pub async fn handle_slash(
        &self,
        name: &str,
        channel_id: Option<ChannelId>,
        author_id: u64,
    ) -> Result<String, Error> {
        let command = match name {
            TOKEN_USAGE_SLASH_COMMAND => QuotaCommand::TokenUsage,
            other => {
                warn!("Unrecognized slash command /{} from {}", other, author_id);
                return Ok(format!("Unrecognized command: {other}"));
            }
        };
        let Some(channel_id) = channel_id else {
            return Ok("Channel not found".to_string());
        };
        self.handle(command, channel_id, author_id).await
    }

    /// Runs a parsed command and returns the reply text. Validation problems
    /// and missing permissions are answered, not returned as errors.
    pub async fn handle(
        &self,
        command: QuotaCommand,
        channel_id: ChannelId,
        author_id: u64,
    ) -> Result<String, Error> {
        if command.requires_power_user() && !self.is_power_user(author_id) {
            warn!(
                "User {} is not allowed to run {:?} in channel {}",
                author_id, command, channel_id
            );
            return Ok(self.prompts.get(NOT_AUTHORIZED_PROMPT)?.to_string());
        }

        match command {
            QuotaCommand::TokenUsage => {
                let status = self.quota.status(channel_id, Utc::now()).await?;
                Ok(format!(
                    "Token usage for {} in the last {} hours: {}",
                    channel_id,
                    self.quota.policy().window.num_hours(),
                    status.used
                ))
            }
            QuotaCommand::DbTokenUsage => {
                let records = self.quota.usage_records(channel_id).await?;
                if records.is_empty() {
                    return Ok(format!("No token usage stored for {}", channel_id));
                }
                let mut lines = vec![format!("Token usage for {}:", channel_id)];
                for record in records.iter().take(MAX_LISTED_RECORDS) {
                    let at = record.created_at.format("%Y-%m-%d %H:%M:%S");
                    lines.push(format!("{} {}", at, record.tokens));
                }
                if records.len() > MAX_LISTED_RECORDS {
                    lines.push(format!("... and {} more", records.len() - MAX_LISTED_RECORDS));
                }
                Ok(lines.join("\n"))
            }
            QuotaCommand::ResetTokenUsage => {
                self.quota.reset_usage(channel_id).await?;
                Ok("Token usage reset".to_string())
            }
            QuotaCommand::SetTokenLimit(raw) => {
                let Some(limit) = raw.as_deref().and_then(|r| r.parse::<i64>().ok()) else {
                    return Ok("Token limit must be a whole number".to_string());
                };
                match self.quota.set_override_limit(channel_id, limit).await {
                    Ok(()) => Ok(format!("Token limit set to {}", limit)),
                    Err(Error::Validation(reason)) => {
                        info!("Rejected token limit for channel {}: {}", channel_id, reason);
                        Ok("Token limit cannot be negative".to_string())
                    }
                    Err(e) => Err(e),
                }
            }
            QuotaCommand::GetTokenLimit => {
                let limit = self
                    .quota
                    .effective_limit(channel_id, self.quota.policy().default_limit)
                    .await?;
                Ok(format!("Token limit for {}: {}", channel_id, limit))
            }
            QuotaCommand::DeleteTokenLimit => {
                self.quota.delete_override_limit(channel_id).await?;
                Ok("Token limit deleted".to_string())
            }
        }
    }
}
