// File: src/cache/message_cache.rs

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use talktome_common::models::{CachedMessage, ChannelId, MessageId};

use crate::Error;
use crate::moderation::ModerationGate;

/// What happened to a message handed to [`MessageCache::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored at the newest end. `evicted` is the oldest entry pushed out to
    /// stay within capacity, if any.
    Inserted {
        flagged: bool,
        evicted: Option<CachedMessage>,
    },
    /// The id is already stored, or another add for it is still in flight.
    Duplicate,
    /// Nothing was stored: the cache has capacity 0, or an older message
    /// found no free slot.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Newest,
    Oldest,
}

/// FIFO buffer for a single channel. `ids` mirrors the ids in `messages`;
/// `pending` holds ids whose moderation check has not finished yet.
#[derive(Default)]
struct ChannelBuffer {
    messages: VecDeque<CachedMessage>,
    ids: HashSet<MessageId>,
    pending: HashSet<MessageId>,
}

impl ChannelBuffer {
    fn push_back(&mut self, message: CachedMessage, capacity: usize) -> Option<CachedMessage> {
        self.ids.insert(message.id);
        self.messages.push_back(message);

        if self.messages.len() <= capacity {
            return None;
        }
        let evicted = self.messages.pop_front();
        if let Some(old) = &evicted {
            self.ids.remove(&old.id);
        }
        evicted
    }

    /// Older messages never push newer ones out; without a free slot the
    /// message is discarded.
    fn push_front(&mut self, message: CachedMessage, capacity: usize) -> bool {
        if self.messages.len() >= capacity {
            return false;
        }
        self.ids.insert(message.id);
        self.messages.push_front(message);
        true
    }
}

/// Holds an id in the channel's `pending` set until the add either commits
/// or is abandoned (moderation error, cancelled future).
struct Reservation {
    buffer: Arc<Mutex<ChannelBuffer>>,
    id: MessageId,
    committed: bool,
}

impl Reservation {
    fn commit(mut self, message: CachedMessage, capacity: usize, end: End) -> AddOutcome {
        let mut buffer = self.buffer.lock();
        buffer.pending.remove(&self.id);
        self.committed = true;

        let flagged = message.flagged;
        match end {
            End::Newest => AddOutcome::Inserted {
                flagged,
                evicted: buffer.push_back(message, capacity),
            },
            End::Oldest if buffer.push_front(message, capacity) => AddOutcome::Inserted {
                flagged,
                evicted: None,
            },
            End::Oldest => AddOutcome::Dropped,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.buffer.lock().pending.remove(&self.id);
        }
    }
}

/// Per-channel bounded message history with id deduplication and a
/// moderation verdict on every stored entry.
///
/// Channels are independent: each has its own lock, and no lock is held
/// while the moderation check runs.
pub struct MessageCache {
    channels: DashMap<ChannelId, Arc<Mutex<ChannelBuffer>>>,
    capacity: usize,
    gate: Arc<ModerationGate>,
}

impl MessageCache {
    pub fn new(capacity: usize, gate: Arc<ModerationGate>) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
            gate,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn buffer(&self, channel_id: ChannelId) -> Arc<Mutex<ChannelBuffer>> {
        self.channels.entry(channel_id).or_default().value().clone()
    }

    fn existing_buffer(&self, channel_id: ChannelId) -> Option<Arc<Mutex<ChannelBuffer>>> {
        self.channels.get(&channel_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Moderates and stores a message at the newest end. Each message id is
    /// checked at most once while it stays in the buffer; if the check fails
    /// nothing is stored and the id may be offered again.
    pub async fn add(
        &self,
        channel_id: ChannelId,
        id: MessageId,
        author: &str,
        content: &str,
    ) -> Result<AddOutcome, Error> {
        self.insert(channel_id, id, author, content, End::Newest).await
    }

    /// Stores a message that is older than everything cached for the
    /// channel, at the oldest end. Only free slots are filled: when the
    /// buffer is full the message is dropped without a moderation check.
    pub async fn add_oldest(
        &self,
        channel_id: ChannelId,
        id: MessageId,
        author: &str,
        content: &str,
    ) -> Result<AddOutcome, Error> {
        self.insert(channel_id, id, author, content, End::Oldest).await
    }

    async fn insert(
        &self,
        channel_id: ChannelId,
        id: MessageId,
        author: &str,
        content: &str,
        end: End,
    ) -> Result<AddOutcome, Error> {
        if self.capacity == 0 {
            return Ok(AddOutcome::Dropped);
        }

        let buffer = self.buffer(channel_id);
        {
            let mut guard = buffer.lock();
            if guard.ids.contains(&id) || guard.pending.contains(&id) {
                trace!("Message {} already cached for channel {}", id, channel_id);
                return Ok(AddOutcome::Duplicate);
            }
            if end == End::Oldest && guard.messages.len() >= self.capacity {
                return Ok(AddOutcome::Dropped);
            }
            guard.pending.insert(id);
        }
        let reservation = Reservation {
            buffer,
            id,
            committed: false,
        };

        let flagged = self.gate.check(content).await?;

        let message = CachedMessage {
            id,
            content: content.to_string(),
            author: author.to_string(),
            flagged,
        };
        let outcome = reservation.commit(message, self.capacity, end);

        if let AddOutcome::Inserted { evicted: Some(old), .. } = &outcome {
            debug!("Evicted message {} from channel {}", old.id, channel_id);
        }
        Ok(outcome)
    }

    /// Messages for the channel, oldest first. Unknown channels are empty.
    pub fn get_ordered(&self, channel_id: ChannelId) -> Vec<CachedMessage> {
        match self.existing_buffer(channel_id) {
            Some(buffer) => buffer.lock().messages.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self, channel_id: ChannelId) -> usize {
        self.existing_buffer(channel_id)
            .map(|buffer| buffer.lock().messages.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel_id: ChannelId) -> bool {
        self.len(channel_id) == 0
    }

    /// Id of the oldest cached message of the channel.
    pub fn oldest_id(&self, channel_id: ChannelId) -> Option<MessageId> {
        self.existing_buffer(channel_id)
            .and_then(|buffer| buffer.lock().messages.front().map(|m| m.id))
    }

    pub fn contains(&self, channel_id: ChannelId, id: MessageId) -> bool {
        self.existing_buffer(channel_id)
            .map(|buffer| buffer.lock().ids.contains(&id))
            .unwrap_or(false)
    }

    /// Drops stored messages for the channel. In-flight adds still land.
    pub fn clear(&self, channel_id: ChannelId) {
        if let Some(buffer) = self.existing_buffer(channel_id) {
            let mut guard = buffer.lock();
            guard.messages.clear();
            guard.ids.clear();
        }
    }
}
