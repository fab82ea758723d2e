// talktome-core/src/moderation/mod.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use talktome_common::traits::ModerationService;

use crate::Error;

pub const DEFAULT_MEMO_CAPACITY: usize = 256;

/// Wraps a [`ModerationService`] with an optional per-call timeout and a
/// small memo of recent verdicts keyed by exact text. Failed checks are not
/// remembered, so the next message with the same text tries again.
pub struct ModerationGate {
    service: Arc<dyn ModerationService>,
    timeout: Option<Duration>,
    memo: Mutex<VerdictMemo>,
}

struct VerdictMemo {
    verdicts: HashMap<String, bool>,
    order: VecDeque<String>,
    capacity: usize,
}

impl VerdictMemo {
    fn get(&self, text: &str) -> Option<bool> {
        self.verdicts.get(text).copied()
    }

    fn insert(&mut self, text: &str, flagged: bool) {
        if self.capacity == 0 || self.verdicts.contains_key(text) {
            return;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.verdicts.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(text.to_string());
        self.verdicts.insert(text.to_string(), flagged);
    }
}

impl ModerationGate {
    pub fn new(service: Arc<dyn ModerationService>) -> Self {
        Self {
            service,
            timeout: None,
            memo: Mutex::new(VerdictMemo {
                verdicts: HashMap::new(),
                order: VecDeque::new(),
                capacity: DEFAULT_MEMO_CAPACITY,
            }),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// A capacity of 0 turns the memo off.
    pub fn with_memo_capacity(self, capacity: usize) -> Self {
        {
            let mut memo = self.memo.lock();
            memo.capacity = capacity;
            memo.verdicts.clear();
            memo.order.clear();
        }
        self
    }

    /// Returns `true` when the text is flagged.
    pub async fn check(&self, text: &str) -> Result<bool, Error> {
        if let Some(flagged) = self.memo.lock().get(text) {
            trace!("Moderation memo hit (flagged={})", flagged);
            return Ok(flagged);
        }

        let flagged = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.service.classify(text)).await??,
            None => self.service.classify(text).await?,
        };

        if flagged {
            debug!("Moderation flagged a message ({} chars)", text.chars().count());
        }
        self.memo.lock().insert(text, flagged);
        Ok(flagged)
    }
}
