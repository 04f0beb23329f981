//! Batched hydration of raw log records into display-ready messages.
//!
//! One lookup per category per batch, regardless of batch size: sender
//! profiles, attachments, mentions, and reply targets are each fetched once
//! for the distinct id set of the whole input, then joined back onto the
//! records through maps. A failed lookup degrades its category for the
//! batch instead of failing the call; the engine patches missing fields in
//! later when it can.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{Directory, MessageLog, RawMessage, Result};

use super::types::{Attachment, Message, Profile};

pub struct EnrichmentResolver {
    log: Arc<dyn MessageLog>,
    directory: Arc<dyn Directory>,
}

impl EnrichmentResolver {
    pub(crate) fn new(log: Arc<dyn MessageLog>, directory: Arc<dyn Directory>) -> Self {
        Self { log, directory }
    }

    /// Hydrate a batch of raw records. Safe to call with an empty batch:
    /// returns an empty vector without issuing any lookups.
    pub async fn enrich(&self, raw: Vec<RawMessage>) -> Vec<Message> {
        if raw.is_empty() {
            return Vec::new();
        }

        let batch_ids: HashSet<&str> = raw.iter().map(|m| m.id.as_str()).collect();
        let message_ids: Vec<String> = raw.iter().map(|m| m.id.clone()).collect();
        let sender_ids: Vec<String> = raw
            .iter()
            .map(|m| m.sender_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        // reply targets already present in the batch resolve locally
        let reply_ids: Vec<String> = raw
            .iter()
            .filter_map(|m| m.reply_to_id.as_deref())
            .filter(|id| !batch_ids.contains(id))
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let (profiles, attachments, mentions, reply_targets) = tokio::join!(
            self.directory.profiles(&sender_ids),
            self.directory.attachments(&message_ids),
            self.directory.mentions(&message_ids),
            self.fetch_reply_targets(reply_ids),
        );

        let profile_map: HashMap<String, Profile> = or_degraded(profiles, "profiles")
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();

        let mut attachment_map: HashMap<String, Vec<Attachment>> = HashMap::new();
        for attachment in or_degraded(attachments, "attachments") {
            attachment_map
                .entry(attachment.message_id.clone())
                .or_default()
                .push(attachment);
        }

        let mut mention_map: HashMap<String, Vec<String>> = HashMap::new();
        for mention in or_degraded(mentions, "mentions") {
            mention_map
                .entry(mention.message_id)
                .or_default()
                .push(mention.user_id);
        }

        let mut reply_map: HashMap<String, RawMessage> = raw
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        for target in or_degraded(reply_targets, "reply targets") {
            reply_map.insert(target.id.clone(), target);
        }

        raw.into_iter()
            .map(|record| {
                let mut message = Message::from_raw(record);
                message.sender = profile_map.get(&message.sender_id).cloned();
                message.attachments = attachment_map.remove(&message.id).unwrap_or_default();
                message.mentions = mention_map.remove(&message.id).unwrap_or_default();
                if let Some(reply_to_id) = message.reply_to_id.clone() {
                    // shallow hydration: the target's own reply is not chased
                    message.reply_to = reply_map.get(&reply_to_id).map(|target| {
                        let mut target = Message::from_raw(target.clone());
                        target.sender = profile_map.get(&target.sender_id).cloned();
                        Box::new(target)
                    });
                }
                message
            })
            .collect()
    }

    async fn fetch_reply_targets(&self, ids: Vec<String>) -> Result<Vec<RawMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.log.list_messages_by_id(&ids).await
    }
}

/// A failed category lookup hydrates to nothing rather than failing the
/// whole batch.
fn or_degraded<T>(result: Result<Vec<T>>, category: &str) -> Vec<T> {
    match result {
        Ok(values) => values,
        Err(e) => {
            tracing::warn!(
                target: "crosstalk::enrichment",
                "{} lookup failed, degrading batch: {}",
                category,
                e
            );
            Vec::new()
        }
    }
}
