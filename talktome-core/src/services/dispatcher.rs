use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{UnboundedSender, error::SendError, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use talktome_common::models::{ChannelId, InboundMessage};
use talktome_common::traits::ReplySink;

use crate::services::message_service::MessageService;

struct Worker {
    tx: UnboundedSender<InboundMessage>,
    handle: JoinHandle<()>,
}

/// Routes inbound messages to one worker task per channel. A channel's
/// messages are handled strictly in arrival order; channels run in parallel.
pub struct ChannelDispatcher {
    service: Arc<MessageService>,
    sink: Arc<dyn ReplySink>,
    workers: DashMap<ChannelId, Worker>,
}

impl ChannelDispatcher {
    pub fn new(service: Arc<MessageService>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            service,
            sink,
            workers: DashMap::new(),
        }
    }

    /// Queues the message on its channel's worker, starting one if needed.
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, inbound: InboundMessage) {
        let channel_id = inbound.channel_id;
        let mut worker = self
            .workers
            .entry(channel_id)
            .or_insert_with(|| self.spawn_worker(channel_id));

        if let Err(SendError(inbound)) = worker.tx.send(inbound) {
            // The previous worker is gone; start a fresh one for this channel.
            error!("Worker for channel {} stopped unexpectedly, restarting", channel_id);
            let replacement = self.spawn_worker(channel_id);
            if replacement.tx.send(inbound).is_err() {
                error!("Dropping message for channel {}: worker unavailable", channel_id);
            }
            *worker = replacement;
        }
    }

    pub fn active_channels(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work and waits until every queued message is handled.
    pub async fn shutdown(&self) {
        let channels: Vec<ChannelId> = self.workers.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(channels.len());
        for channel_id in channels {
            if let Some((_, worker)) = self.workers.remove(&channel_id) {
                drop(worker.tx);
                handles.push(worker.handle);
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Channel worker ended abnormally: {:?}", e);
            }
        }
    }

    fn spawn_worker(&self, channel_id: ChannelId) -> Worker {
        let (tx, mut rx) = unbounded_channel::<InboundMessage>();
        let service = Arc::clone(&self.service);
        let sink = Arc::clone(&self.sink);

        let handle = tokio::spawn(async move {
            debug!("Worker for channel {} started", channel_id);
            while let Some(inbound) = rx.recv().await {
                process(&service, sink.as_ref(), &inbound).await;
            }
            debug!("Worker for channel {} finished", channel_id);
        });

        Worker { tx, handle }
    }
}

async fn process(service: &MessageService, sink: &dyn ReplySink, inbound: &InboundMessage) {
    match service.handle(inbound).await {
        Ok(Some(reply)) => match sink.send_message(inbound.channel_id, &reply).await {
            // Own messages never come back through the gateway, so the reply
            // is cached here to keep it in the next conversation.
            Ok(sent) => {
                if let Err(e) = service.remember_reply(inbound.channel_id, &sent).await {
                    error!("Failed to cache reply in channel {}: {}", inbound.channel_id, e);
                }
            }
            Err(e) => error!("Failed to send reply to channel {}: {}", inbound.channel_id, e),
        },
        Ok(None) => {}
        Err(e) => {
            error!(
                "Failed to handle message {} in channel {}: {}",
                inbound.message_id, inbound.channel_id, e
            );
        }
    }
}
