//! In-memory message window for one open conversation.
//!
//! The store is an ordered, deduplicated collection of messages sorted by
//! creation time (ascending, ties stable by insertion order). All mutations
//! are synchronous and free of side effects beyond the store's own state,
//! which keeps every consistency rule testable without a runtime.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::types::{Message, MessagePatch};

#[derive(Debug)]
pub(crate) struct ConversationStore {
    messages: Vec<Message>,
    ids: HashSet<String>,
    has_more: bool,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            has_more: true,
        }
    }

    /// Sorted insert by `created_at`. Inserting an id that is already
    /// present is a no-op, which absorbs duplicate event delivery.
    ///
    /// Returns whether the message was actually inserted.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        // partition_point keeps equal timestamps in arrival order
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(at, message);
        true
    }

    /// Partial merge into the record with the given id. When the id is
    /// absent a new record is seeded from the patch, which covers changes
    /// observed before the record itself was.
    ///
    /// Returns the state of the record after the merge.
    pub fn upsert_by_id(&mut self, id: &str, patch: MessagePatch) -> Message {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.apply(patch);
            return message.clone();
        }
        let seeded = Message::seeded(id, patch);
        self.insert(seeded.clone());
        seeded
    }

    /// Remove the record if present; an absent id is a silent no-op.
    ///
    /// Returns the removed message.
    pub fn remove_by_id(&mut self, id: &str) -> Option<Message> {
        let at = self.messages.iter().position(|m| m.id == id)?;
        self.ids.remove(id);
        Some(self.messages.remove(at))
    }

    /// Promote a provisional record to its durable id, renaming in place so
    /// the record keeps its list position and observers see one mutation,
    /// not a removal plus an insert.
    ///
    /// When the durable id is already present (its insert event outran the
    /// write's own response), the provisional copy is dropped and the patch
    /// merged into the durable record instead, preserving the
    /// one-copy-per-id invariant.
    ///
    /// Returns the promoted record, or `None` when neither id is present.
    pub fn replace_id(&mut self, old_id: &str, new_id: &str, patch: MessagePatch) -> Option<Message> {
        if old_id != new_id && self.ids.contains(new_id) {
            self.remove_by_id(old_id);
            return Some(self.upsert_by_id(new_id, patch));
        }
        let message = self.messages.iter_mut().find(|m| m.id == old_id)?;
        message.id = new_id.to_string();
        message.apply(patch);
        let promoted = message.clone();
        self.ids.remove(old_id);
        self.ids.insert(new_id.to_string());
        Some(promoted)
    }

    /// The current window in ascending `created_at` order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Pagination cursor: creation time of the oldest loaded message.
    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.created_at)
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn set_has_more(&mut self, has_more: bool) {
        self.has_more = has_more;
    }
}
