//! Core data types for the synchronization engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::RawMessage;

/// Hydrated profile snapshot for a message sender.
///
/// Owned by the enrichment step, not by the message itself; a message whose
/// sender could not be resolved carries `sender: None` and still renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A file attached to a message.
///
/// Owned exclusively by its message and removed together with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// A conversation message as exposed to the UI.
///
/// Created either provisionally by a local send (client-generated UUID id,
/// `is_provisional == true`) or from a durable record delivered by a page
/// fetch or the change-event stream. A provisional message is structurally
/// indistinguishable from a confirmed one apart from the flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Server-assigned once durable; a client-generated UUID while provisional.
    pub id: String,

    pub conversation_id: String,

    pub sender_id: String,

    pub content: String,

    /// Weak reference to the message this one replies to.
    pub reply_to_id: Option<String>,

    /// Server-authoritative once durable.
    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub is_edited: bool,

    /// True only between the local optimistic insert and the durable
    /// write's confirmation.
    pub is_provisional: bool,

    /// Hydrated sender snapshot; `None` when the lookup failed or has not
    /// resolved yet.
    pub sender: Option<Profile>,

    pub attachments: Vec<Attachment>,

    /// User ids mentioned in this message.
    pub mentions: Vec<String>,

    /// Hydrated reply target, resolved shallowly by lookup.
    pub reply_to: Option<Box<Message>>,
}

impl Message {
    /// An un-enriched message built from a durable log record.
    pub fn from_raw(raw: RawMessage) -> Self {
        Self {
            id: raw.id,
            conversation_id: raw.conversation_id,
            sender_id: raw.sender_id,
            content: raw.content,
            reply_to_id: raw.reply_to_id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            is_edited: raw.is_edited,
            is_provisional: false,
            sender: None,
            attachments: Vec::new(),
            mentions: Vec::new(),
            reply_to: None,
        }
    }

    /// A provisional message for a local send, visible before the durable
    /// write confirms.
    pub(crate) fn provisional(
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        options: &SendOptions,
        sender: Option<Profile>,
        reply_to: Option<Box<Message>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            reply_to_id: options.reply_to_id.clone(),
            created_at: now,
            updated_at: now,
            is_edited: false,
            is_provisional: true,
            sender,
            attachments: Vec::new(),
            mentions: options.mentions.clone(),
            reply_to,
        }
    }

    /// A minimal record constructed from a patch when an id is upserted
    /// before any full record for it was seen.
    pub(crate) fn seeded(id: &str, patch: MessagePatch) -> Self {
        let now = Utc::now();
        let mut message = Self {
            id: id.to_string(),
            conversation_id: String::new(),
            sender_id: String::new(),
            content: String::new(),
            reply_to_id: None,
            created_at: now,
            updated_at: now,
            is_edited: false,
            is_provisional: false,
            sender: None,
            attachments: Vec::new(),
            mentions: Vec::new(),
            reply_to: None,
        };
        message.apply(patch);
        message
    }

    /// Merge the set fields of `patch` into this message.
    pub(crate) fn apply(&mut self, patch: MessagePatch) {
        if let Some(conversation_id) = patch.conversation_id {
            self.conversation_id = conversation_id;
        }
        if let Some(sender_id) = patch.sender_id {
            self.sender_id = sender_id;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(reply_to_id) = patch.reply_to_id {
            self.reply_to_id = Some(reply_to_id);
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
        if let Some(is_edited) = patch.is_edited {
            self.is_edited = is_edited;
        }
        if let Some(is_provisional) = patch.is_provisional {
            self.is_provisional = is_provisional;
        }
        if let Some(sender) = patch.sender {
            self.sender = Some(sender);
        }
        if let Some(attachments) = patch.attachments {
            self.attachments = attachments;
        }
        if let Some(mentions) = patch.mentions {
            self.mentions = mentions;
        }
        if let Some(reply_to) = patch.reply_to {
            self.reply_to = Some(reply_to);
        }
    }
}

/// Partial merge applied by `upsert_by_id` and `replace_id`. Unset fields
/// leave the target untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub content: Option<String>,
    pub reply_to_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_edited: Option<bool>,
    pub is_provisional: Option<bool>,
    pub sender: Option<Profile>,
    pub attachments: Option<Vec<Attachment>>,
    pub mentions: Option<Vec<String>>,
    pub reply_to: Option<Box<Message>>,
}

impl MessagePatch {
    /// The merge an update event carries: every server-authoritative field
    /// of the record.
    pub(crate) fn from_raw(raw: &RawMessage) -> Self {
        Self {
            conversation_id: Some(raw.conversation_id.clone()),
            sender_id: Some(raw.sender_id.clone()),
            content: Some(raw.content.clone()),
            reply_to_id: raw.reply_to_id.clone(),
            created_at: Some(raw.created_at),
            updated_at: Some(raw.updated_at),
            is_edited: Some(raw.is_edited),
            ..Default::default()
        }
    }
}

/// Options for a local send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Id of the message being replied to, if any.
    pub reply_to_id: Option<String>,

    /// User ids mentioned in the message.
    pub mentions: Vec<String>,
}

/// What triggered a message update.
///
/// The accompanying `message` field in [`MessageUpdate`] always contains
/// the complete, current state of the affected message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTrigger {
    /// A message entered the window (page fetch, local send, insert event).
    MessageAdded,

    /// A provisional message was confirmed and renamed to its durable id.
    MessagePromoted,

    /// Content or flags changed (edit, update event).
    MessageUpdated,

    /// Deferred enrichment resolved and was patched in.
    MessageEnriched,

    /// The message left the window (delete, rollback).
    MessageRemoved,
}

/// A single update pushed to window subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdate {
    /// What triggered this update.
    pub trigger: UpdateTrigger,

    /// The complete, current state of the affected message. For
    /// `MessageRemoved` this is the state it had when removed.
    pub message: Message,
}

/// Category of a user-visible failure notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    SendFailed,
    EditFailed,
    DeleteFailed,
    LoadFailed,
}

/// Toast-equivalent side-channel notice. The engine's public methods never
/// surface errors directly; failures arrive here instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncNotice {
    pub kind: NoticeKind,
    pub conversation_id: String,
    pub detail: String,
}
