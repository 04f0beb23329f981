//! Collaborator interfaces consumed by the synchronization engine.
//!
//! Everything the engine needs from the outside world sits behind these
//! traits: the durable message log, batched directory lookups, the live
//! change-event stream, and fire-and-forget notification dispatch. The
//! engine never talks to a network or a database directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::crosstalk::types::{Attachment, Profile};

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Durable write failed: {0}")]
    Write(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Not found")]
    NotFound,

    #[error("Subscription failed: {0}")]
    Subscription(String),
}

impl BackendError {
    /// Whether the caller may retry the same operation later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackendError::Write(_) | BackendError::Fetch(_) | BackendError::Subscription(_)
        )
    }
}

/// An un-enriched message record as stored in the durable log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_edited: bool,
}

/// Server acknowledgement for a durable create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    /// The server-assigned message id.
    pub id: String,
    /// The server-authoritative creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A mention row from the directory, keyed by the message it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MentionRecord {
    pub message_id: String,
    pub user_id: String,
}

/// A single change delivered by the event stream.
///
/// Delivery is at-least-once and ordering is not guaranteed across distinct
/// message ids; the engine deduplicates by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChangeEvent {
    Insert(RawMessage),
    Update(RawMessage),
    Delete { message_id: String },
}

/// Live event feed for one conversation.
///
/// Owned by the listener task for exactly one open conversation; dropping
/// the subscription ends delivery on the transport side.
pub struct ChangeSubscription {
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// The durable, queryable message log.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a message to the log. Returns the server-assigned id and
    /// creation timestamp.
    async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        reply_to_id: Option<&str>,
    ) -> Result<MessageReceipt>;

    /// Replace a message's content. Authorized to the original sender only.
    async fn update_message_content(&self, message_id: &str, content: &str) -> Result<()>;

    /// Delete a message. Authorized to the original sender only.
    async fn delete_message(&self, message_id: &str) -> Result<()>;

    /// A page of messages for the conversation, newest-first. When `before`
    /// is given, only messages strictly older than it are returned.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>>;

    /// Point lookups by id, used to resolve reply targets that fall outside
    /// the current batch. Unknown ids are silently absent from the result.
    async fn list_messages_by_id(&self, ids: &[String]) -> Result<Vec<RawMessage>>;

    /// Persist the mention rows for a confirmed message.
    async fn record_mentions(&self, message_id: &str, user_ids: &[String]) -> Result<()>;
}

/// Batched directory lookups for enrichment and notification fan-out.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>>;

    async fn attachments(&self, message_ids: &[String]) -> Result<Vec<Attachment>>;

    async fn mentions(&self, message_ids: &[String]) -> Result<Vec<MentionRecord>>;

    /// User ids of everyone in the conversation, including the local user.
    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>>;
}

/// The live change-event transport.
#[async_trait]
pub trait ChangeStream: Send + Sync {
    async fn subscribe(&self, conversation_id: &str) -> Result<ChangeSubscription>;
}

/// Fire-and-forget notification dispatch to other participants.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_new_message(
        &self,
        recipient_ids: &[String],
        conversation_id: &str,
        message_id: &str,
    ) -> Result<()>;

    async fn notify_mention(
        &self,
        user_id: &str,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<()>;
}
