use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::ChannelId;

/// One model response worth of token consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub channel_id: ChannelId,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: i64,
    pub limit: i64,
    pub exceeded: bool,
}
