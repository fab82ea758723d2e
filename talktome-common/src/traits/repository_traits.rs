use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::channel::ChannelId;
use crate::models::quota::UsageRecord;

/// Append-only store of token usage plus per-channel limit overrides.
///
/// Implementations own their transaction and locking discipline. Every
/// method must either commit fully or return an error; a usage row that could
/// not be stored must never be reported as `Ok`.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn append(
        &self,
        channel_id: ChannelId,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Records of `channel_id` with `created_at > since`, in any order.
    async fn query(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, Error>;

    /// All records of `channel_id`, newest first.
    async fn list(&self, channel_id: ChannelId) -> Result<Vec<UsageRecord>, Error>;

    /// Deletes records of every channel with `created_at < cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    /// Deletes every record of `channel_id`.
    async fn delete_for_channel(&self, channel_id: ChannelId) -> Result<u64, Error>;

    async fn get_override_limit(&self, channel_id: ChannelId) -> Result<Option<i64>, Error>;

    /// Inserts or replaces the channel's override.
    async fn set_override_limit(&self, channel_id: ChannelId, limit: i64) -> Result<(), Error>;

    /// Returns whether an override existed.
    async fn delete_override_limit(&self, channel_id: ChannelId) -> Result<bool, Error>;
}
