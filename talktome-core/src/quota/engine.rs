// File: src/quota/engine.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use talktome_common::models::{ChannelId, QuotaStatus, UsageRecord};
use talktome_common::traits::QuotaLedger;

use crate::Error;

pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    /// Applies to every channel without a (non-zero) override.
    pub default_limit: i64,
    /// Sliding window usage is summed over.
    pub window: Duration,
}

impl QuotaPolicy {
    pub fn new(default_limit: i64) -> Self {
        Self {
            default_limit,
            window: Duration::hours(DEFAULT_WINDOW_HOURS),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Sliding-window token accounting on top of a [`QuotaLedger`].
///
/// Usage is always recomputed from the ledger; nothing is cached here, so
/// several engines over one ledger agree with each other.
pub struct QuotaEngine {
    ledger: Arc<dyn QuotaLedger>,
    policy: QuotaPolicy,
}

impl QuotaEngine {
    pub fn new(ledger: Arc<dyn QuotaLedger>, policy: QuotaPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Sum of tokens recorded for the channel strictly after `now - window`.
    pub async fn usage_in_window(
        &self,
        channel_id: ChannelId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<i64, Error> {
        let since = now - window;
        let records = self.ledger.query(channel_id, since).await?;
        Ok(records
            .iter()
            .filter(|r| r.created_at > since)
            .fold(0i64, |acc, r| acc.saturating_add(r.tokens)))
    }

    /// The channel's override, or `default_limit` when there is none.
    /// A stored override of 0 also yields the default.
    pub async fn effective_limit(
        &self,
        channel_id: ChannelId,
        default_limit: i64,
    ) -> Result<i64, Error> {
        match self.ledger.get_override_limit(channel_id).await? {
            Some(limit) if limit != 0 => Ok(limit),
            _ => Ok(default_limit),
        }
    }

    pub async fn is_exceeded(
        &self,
        channel_id: ChannelId,
        now: DateTime<Utc>,
        window: Duration,
        default_limit: i64,
    ) -> Result<bool, Error> {
        let used = self.usage_in_window(channel_id, now, window).await?;
        let limit = self.effective_limit(channel_id, default_limit).await?;
        Ok(used >= limit)
    }

    /// Usage and limit under this engine's policy.
    pub async fn status(
        &self,
        channel_id: ChannelId,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus, Error> {
        let used = self.usage_in_window(channel_id, now, self.policy.window).await?;
        let limit = self.effective_limit(channel_id, self.policy.default_limit).await?;
        Ok(QuotaStatus {
            used,
            limit,
            exceeded: used >= limit,
        })
    }

    pub async fn record_usage(
        &self,
        channel_id: ChannelId,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        if tokens < 0 {
            return Err(Error::Validation(format!("token count cannot be negative: {}", tokens)));
        }
        self.ledger.append(channel_id, tokens, at).await?;
        debug!("Recorded {} tokens for channel {}", tokens, channel_id);
        Ok(())
    }

    /// Removes usage records of every channel created before `cutoff`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        self.ledger.delete_older_than(cutoff).await
    }

    pub async fn set_override_limit(&self, channel_id: ChannelId, limit: i64) -> Result<(), Error> {
        if limit < 0 {
            return Err(Error::Validation(format!("token limit cannot be negative: {}", limit)));
        }
        self.ledger.set_override_limit(channel_id, limit).await?;
        info!("Token limit for channel {} set to {}", channel_id, limit);
        Ok(())
    }

    pub async fn delete_override_limit(&self, channel_id: ChannelId) -> Result<bool, Error> {
        let existed = self.ledger.delete_override_limit(channel_id).await?;
        if existed {
            info!("Token limit override for channel {} deleted", channel_id);
        }
        Ok(existed)
    }

    /// Wipes the channel's usage history.
    pub async fn reset_usage(&self, channel_id: ChannelId) -> Result<u64, Error> {
        let deleted = self.ledger.delete_for_channel(channel_id).await?;
        info!("Reset token usage for channel {} ({} records)", channel_id, deleted);
        Ok(deleted)
    }

    /// Every stored usage record of the channel, newest first.
    pub async fn usage_records(&self, channel_id: ChannelId) -> Result<Vec<UsageRecord>, Error> {
        self.ledger.list(channel_id).await
    }
}
