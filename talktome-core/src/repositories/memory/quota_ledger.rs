use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use talktome_common::models::{ChannelId, UsageRecord};
use talktome_common::traits::QuotaLedger;

use crate::Error;

#[derive(Default)]
struct LedgerState {
    records: Vec<UsageRecord>,
    overrides: HashMap<ChannelId, i64>,
}

/// Process-local ledger. Used in tests and when running without Postgres;
/// contents are lost on restart.
#[derive(Default)]
pub struct InMemoryQuotaLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn append(
        &self,
        channel_id: ChannelId,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        if tokens < 0 {
            return Err(Error::Validation(format!("token count cannot be negative: {}", tokens)));
        }
        self.state.write().await.records.push(UsageRecord {
            channel_id,
            tokens,
            created_at: at,
        });
        Ok(())
    }

    async fn query(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, Error> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.channel_id == channel_id && r.created_at > since)
            .cloned()
            .collect())
    }

    async fn list(&self, channel_id: ChannelId) -> Result<Vec<UsageRecord>, Error> {
        let state = self.state.read().await;
        let mut records: Vec<UsageRecord> = state
            .records
            .iter()
            .filter(|r| r.channel_id == channel_id)
            .cloned()
            .collect();
        // Stable sort keeps later appends ahead of earlier ones at equal times.
        records.reverse();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| r.created_at >= cutoff);
        Ok((before - state.records.len()) as u64)
    }

    async fn delete_for_channel(&self, channel_id: ChannelId) -> Result<u64, Error> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| r.channel_id != channel_id);
        Ok((before - state.records.len()) as u64)
    }

    async fn get_override_limit(&self, channel_id: ChannelId) -> Result<Option<i64>, Error> {
        Ok(self.state.read().await.overrides.get(&channel_id).copied())
    }

    async fn set_override_limit(&self, channel_id: ChannelId, limit: i64) -> Result<(), Error> {
        if limit < 0 {
            return Err(Error::Validation(format!("token limit cannot be negative: {}", limit)));
        }
        self.state.write().await.overrides.insert(channel_id, limit);
        Ok(())
    }

    async fn delete_override_limit(&self, channel_id: ChannelId) -> Result<bool, Error> {
        Ok(self.state.write().await.overrides.remove(&channel_id).is_some())
    }
}
