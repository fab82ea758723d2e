// File: talktome-common/src/models/mod.rs

pub mod ai;
pub mod cache;
pub mod channel;
pub mod quota;

pub use ai::{ChatMessage, ChatRole, ModelReply};
pub use cache::{CachedMessage, InboundMessage, SentMessage};
pub use channel::{ChannelId, MessageId};
pub use quota::{QuotaStatus, UsageRecord};
