//! Optimistic writes: send, edit, delete.
//!
//! A send is visible immediately as a provisional record, confirmed by the
//! durable write and promoted in place to its server id, or rolled back if
//! the write fails. Notification fan-out and mention persistence happen
//! after confirmation on a detached task; their failures never reach the
//! caller.

use std::collections::HashSet;

use chrono::Utc;
use futures::future::join_all;

use super::types::{
    Message, MessagePatch, MessageUpdate, NoticeKind, SendOptions, UpdateTrigger,
};
use super::Crosstalk;

impl Crosstalk {
    /// Send a message to the open conversation.
    ///
    /// Returns the confirmed message, or `None` when the durable write
    /// failed (the provisional record is rolled back and a `SendFailed`
    /// notice emitted) or no conversation is open. Multiple sends may be in
    /// flight at once; each gets its own provisional id.
    pub async fn send(&self, content: &str, options: SendOptions) -> Option<Message> {
        let (conversation_id, epoch, provisional) = {
            let mut guard = self.session.lock().unwrap();
            let Some(session) = guard.as_mut() else {
                tracing::warn!(target: "crosstalk::send", "send with no open conversation");
                return None;
            };
            let reply_to = options
                .reply_to_id
                .as_deref()
                .and_then(|id| session.store.get(id))
                .cloned()
                .map(Box::new);
            let message = Message::provisional(
                &session.conversation_id,
                &self.local_user_id,
                content,
                &options,
                session.self_profile.clone(),
                reply_to,
            );
            session.store.insert(message.clone());
            (session.conversation_id.clone(), session.epoch, message)
        };
        self.streams.emit(
            &conversation_id,
            MessageUpdate {
                trigger: UpdateTrigger::MessageAdded,
                message: provisional.clone(),
            },
        );

        match self
            .log
            .create_message(
                &conversation_id,
                &self.local_user_id,
                content,
                options.reply_to_id.as_deref(),
            )
            .await
        {
            Ok(receipt) => {
                let patch = MessagePatch {
                    created_at: Some(receipt.created_at),
                    updated_at: Some(receipt.created_at),
                    is_provisional: Some(false),
                    ..Default::default()
                };
                let promoted = self
                    .with_session(epoch, |session| {
                        session.store.replace_id(&provisional.id, &receipt.id, patch)
                    })
                    .flatten();
                if let Some(message) = &promoted {
                    self.streams.emit(
                        &conversation_id,
                        MessageUpdate {
                            trigger: UpdateTrigger::MessagePromoted,
                            message: message.clone(),
                        },
                    );
                }
                self.spawn_side_effects(&conversation_id, &receipt.id, options.mentions);

                // if the conversation was switched mid-flight the store is
                // gone, but the write is durable; report it to the caller
                Some(promoted.unwrap_or_else(|| {
                    let mut message = provisional;
                    message.id = receipt.id;
                    message.created_at = receipt.created_at;
                    message.updated_at = receipt.created_at;
                    message.is_provisional = false;
                    message
                }))
            }
            Err(e) => {
                let removed = self
                    .with_session(epoch, |session| session.store.remove_by_id(&provisional.id))
                    .flatten();
                if let Some(message) = removed {
                    self.streams.emit(
                        &conversation_id,
                        MessageUpdate {
                            trigger: UpdateTrigger::MessageRemoved,
                            message,
                        },
                    );
                }
                self.notify_failure(NoticeKind::SendFailed, &conversation_id, e);
                None
            }
        }
    }

    /// Edit a message's content. Returns whether the durable edit
    /// succeeded; on failure the window is left unchanged and an
    /// `EditFailed` notice emitted.
    pub async fn edit(&self, message_id: &str, new_content: &str) -> bool {
        let Some((conversation_id, epoch)) = self.session_info() else {
            tracing::warn!(target: "crosstalk::edit", "edit with no open conversation");
            return false;
        };
        match self.log.update_message_content(message_id, new_content).await {
            Ok(()) => {
                let patch = MessagePatch {
                    content: Some(new_content.to_string()),
                    is_edited: Some(true),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                };
                let updated = self
                    .with_session(epoch, |session| {
                        session
                            .store
                            .contains(message_id)
                            .then(|| session.store.upsert_by_id(message_id, patch))
                    })
                    .flatten();
                if let Some(message) = updated {
                    self.streams.emit(
                        &conversation_id,
                        MessageUpdate {
                            trigger: UpdateTrigger::MessageUpdated,
                            message,
                        },
                    );
                }
                true
            }
            Err(e) => {
                self.notify_failure(NoticeKind::EditFailed, &conversation_id, e);
                false
            }
        }
    }

    /// Delete a message. Returns whether the durable delete succeeded; on
    /// failure the window is left unchanged and a `DeleteFailed` notice
    /// emitted.
    pub async fn remove(&self, message_id: &str) -> bool {
        let Some((conversation_id, epoch)) = self.session_info() else {
            tracing::warn!(target: "crosstalk::remove", "remove with no open conversation");
            return false;
        };
        match self.log.delete_message(message_id).await {
            Ok(()) => {
                let removed = self
                    .with_session(epoch, |session| session.store.remove_by_id(message_id))
                    .flatten();
                if let Some(message) = removed {
                    self.streams.emit(
                        &conversation_id,
                        MessageUpdate {
                            trigger: UpdateTrigger::MessageRemoved,
                            message,
                        },
                    );
                }
                true
            }
            Err(e) => {
                self.notify_failure(NoticeKind::DeleteFailed, &conversation_id, e);
                false
            }
        }
    }

    fn spawn_side_effects(&self, conversation_id: &str, message_id: &str, mentions: Vec<String>) {
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            engine
                .dispatch_side_effects(&conversation_id, &message_id, &mentions)
                .await;
        });
    }

    /// Best-effort side effects of a confirmed send. Every failure here is
    /// logged and swallowed; the message itself is already durable.
    async fn dispatch_side_effects(&self, conversation_id: &str, message_id: &str, mentions: &[String]) {
        if !mentions.is_empty() {
            if let Err(e) = self.log.record_mentions(message_id, mentions).await {
                tracing::warn!(
                    target: "crosstalk::send",
                    "failed to persist mentions for {}: {}",
                    message_id,
                    e
                );
            }
        }

        let participants = match self.directory.participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                tracing::warn!(
                    target: "crosstalk::send",
                    "failed to resolve participants of {}: {}",
                    conversation_id,
                    e
                );
                return;
            }
        };

        // mentioned users get only the mention notification, never the
        // generic one; the sender gets neither
        let mentioned: HashSet<&String> = mentions.iter().collect();
        let recipients: Vec<String> = participants
            .into_iter()
            .filter(|p| *p != self.local_user_id && !mentioned.contains(p))
            .collect();
        if !recipients.is_empty() {
            if let Err(e) = self
                .notifier
                .notify_new_message(&recipients, conversation_id, message_id)
                .await
            {
                tracing::warn!(
                    target: "crosstalk::send",
                    "new-message notification failed for {}: {}",
                    message_id,
                    e
                );
            }
        }

        let mention_targets: Vec<&String> = mentions
            .iter()
            .filter(|user| **user != self.local_user_id)
            .collect();
        let results = join_all(
            mention_targets
                .iter()
                .map(|user| self.notifier.notify_mention(user, conversation_id, message_id)),
        )
        .await;
        for (user, result) in mention_targets.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    target: "crosstalk::send",
                    "mention notification to {} failed for {}: {}",
                    user,
                    message_id,
                    e
                );
            }
        }
    }
}
