//! Per-conversation broadcast channels for window updates.
//!
//! Lazy stream creation and automatic cleanup when all receivers are
//! dropped; this is the reactive half of the `messages()` contract.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::MessageUpdate;

const BUFFER_SIZE: usize = 100;

pub struct UpdateStreamManager {
    streams: DashMap<String, broadcast::Sender<MessageUpdate>>,
}

impl UpdateStreamManager {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<MessageUpdate> {
        self.streams
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(BUFFER_SIZE).0)
            .subscribe()
    }

    pub fn emit(&self, conversation_id: &str, update: MessageUpdate) {
        if let Some(sender) = self.streams.get(conversation_id) {
            // Attempt to send; if all receivers dropped, clean up
            if sender.send(update).is_err() && sender.receiver_count() == 0 {
                drop(sender);
                self.streams.remove(conversation_id);
            }
        }
    }
}

impl Default for UpdateStreamManager {
    fn default() -> Self {
        Self::new()
    }
}
