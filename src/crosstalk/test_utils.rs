//! In-memory collaborators and helpers shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};

use crate::backend::{
    BackendError, ChangeEvent, ChangeStream, ChangeSubscription, Directory, MentionRecord,
    MessageLog, MessageReceipt, NotificationDispatcher, RawMessage, Result,
};
use crate::crosstalk::types::{Attachment, Profile};
use crate::crosstalk::{Collaborators, Crosstalk, CrosstalkConfig};

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub(crate) fn raw_message(
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    secs: i64,
) -> RawMessage {
    let at = base_time() + chrono::Duration::seconds(secs);
    RawMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        reply_to_id: None,
        created_at: at,
        updated_at: at,
        is_edited: false,
    }
}

/// Poll until `condition` holds; panics after two seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within deadline");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub(crate) fn test_backend() -> Arc<TestBackend> {
    Arc::new(TestBackend::default())
}

pub(crate) fn test_engine() -> (Arc<Crosstalk>, Arc<TestBackend>) {
    test_engine_with(CrosstalkConfig::default())
}

pub(crate) fn test_engine_with(config: CrosstalkConfig) -> (Arc<Crosstalk>, Arc<TestBackend>) {
    let backend = test_backend();
    let collaborators = Collaborators {
        log: backend.clone(),
        directory: backend.clone(),
        stream: backend.clone(),
        notifier: backend.clone(),
    };
    let engine = Crosstalk::new("alice", collaborators, config);
    (engine, backend)
}

#[derive(Default)]
struct BackendState {
    messages: Vec<RawMessage>,
    profiles: HashMap<String, Profile>,
    attachments: HashMap<String, Vec<Attachment>>,
    mentions: HashMap<String, Vec<String>>,
    participants: HashMap<String, Vec<String>>,
}

/// In-memory stand-in for every collaborator trait, with switchable
/// failures and gates for deterministic interleaving.
#[derive(Default)]
pub(crate) struct TestBackend {
    state: Mutex<BackendState>,
    subscriptions: DashMap<String, mpsc::Sender<ChangeEvent>>,
    write_gate: Mutex<Option<Arc<Notify>>>,
    page_gate: Mutex<Option<Arc<Notify>>>,
    fail_writes: AtomicBool,
    fail_fetches: AtomicBool,
    fail_lookups: AtomicBool,
    fail_subscribes: AtomicBool,
    fail_notifies: AtomicBool,
    deny_mutations: AtomicBool,
    profile_lookups: AtomicUsize,
    attachment_lookups: AtomicUsize,
    mention_lookups: AtomicUsize,
    next_id: AtomicU64,
    new_message_notifications: Mutex<Vec<(Vec<String>, String)>>,
    mention_notifications: Mutex<Vec<(String, String)>>,
    recorded_mentions: Mutex<Vec<(String, Vec<String>)>>,
}

impl TestBackend {
    pub fn seed_message(&self, message: RawMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn put_profile(&self, user_id: &str, display_name: &str) {
        self.state.lock().unwrap().profiles.insert(
            user_id.to_string(),
            Profile {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                avatar_url: None,
            },
        );
    }

    pub fn put_attachment(&self, id: &str, message_id: &str, file_name: &str) {
        self.state
            .lock()
            .unwrap()
            .attachments
            .entry(message_id.to_string())
            .or_default()
            .push(Attachment {
                id: id.to_string(),
                message_id: message_id.to_string(),
                file_path: format!("/files/{file_name}"),
                file_name: file_name.to_string(),
                file_type: "image/jpeg".to_string(),
                file_size: 1024,
                uploaded_at: base_time(),
            });
    }

    pub fn put_mention(&self, message_id: &str, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .mentions
            .entry(message_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub fn put_participants(&self, conversation_id: &str, user_ids: &[&str]) {
        self.state.lock().unwrap().participants.insert(
            conversation_id.to_string(),
            user_ids.iter().map(|u| u.to_string()).collect(),
        );
    }

    /// Hold every durable create until the returned gate is released with
    /// `notify_one`.
    pub fn gate_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold historical page fetches (those with a cursor) until released.
    /// Initial page loads pass through.
    pub fn gate_pages(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.page_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notifies(&self, fail: bool) {
        self.fail_notifies.store(fail, Ordering::SeqCst);
    }

    pub fn deny_mutations(&self, deny: bool) {
        self.deny_mutations.store(deny, Ordering::SeqCst);
    }

    /// Deliver a change event to the active subscription, if any. Returns
    /// whether the event was accepted by a live receiver.
    pub async fn emit(&self, conversation_id: &str, event: ChangeEvent) -> bool {
        let sender = match self.subscriptions.get(conversation_id) {
            Some(sender) => sender.clone(),
            None => return false,
        };
        sender.send(event).await.is_ok()
    }

    pub fn subscribed(&self, conversation_id: &str) -> bool {
        self.subscriptions
            .get(conversation_id)
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    pub fn profile_lookups(&self) -> usize {
        self.profile_lookups.load(Ordering::SeqCst)
    }

    pub fn attachment_lookups(&self) -> usize {
        self.attachment_lookups.load(Ordering::SeqCst)
    }

    pub fn mention_lookups(&self) -> usize {
        self.mention_lookups.load(Ordering::SeqCst)
    }

    pub fn new_message_notifications(&self) -> Vec<(Vec<String>, String)> {
        self.new_message_notifications.lock().unwrap().clone()
    }

    pub fn mention_notifications(&self) -> Vec<(String, String)> {
        self.mention_notifications.lock().unwrap().clone()
    }

    pub fn recorded_mentions(&self) -> Vec<(String, Vec<String>)> {
        self.recorded_mentions.lock().unwrap().clone()
    }

    fn gate(slot: &Mutex<Option<Arc<Notify>>>) -> Option<Arc<Notify>> {
        slot.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageLog for TestBackend {
    async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        reply_to_id: Option<&str>,
    ) -> Result<MessageReceipt> {
        if let Some(gate) = Self::gate(&self.write_gate) {
            gate.notified().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Write("synthetic write failure".to_string()));
        }
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created_at = Utc::now();
        self.state.lock().unwrap().messages.push(RawMessage {
            id: id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            reply_to_id: reply_to_id.map(str::to_string),
            created_at,
            updated_at: created_at,
            is_edited: false,
        });
        Ok(MessageReceipt { id, created_at })
    }

    async fn update_message_content(&self, message_id: &str, content: &str) -> Result<()> {
        if self.deny_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::NotAuthorized);
        }
        let mut state = self.state.lock().unwrap();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(BackendError::NotFound)?;
        message.content = content.to_string();
        message.is_edited = true;
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        if self.deny_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::NotAuthorized);
        }
        let mut state = self.state.lock().unwrap();
        let before = state.messages.len();
        state.messages.retain(|m| m.id != message_id);
        if state.messages.len() == before {
            return Err(BackendError::NotFound);
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>> {
        if before.is_some() {
            if let Some(gate) = Self::gate(&self.page_gate) {
                gate.notified().await;
            }
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic fetch failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        let mut page: Vec<RawMessage> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.is_none_or(|cursor| m.created_at < cursor))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(limit);
        Ok(page)
    }

    async fn list_messages_by_id(&self, ids: &[String]) -> Result<Vec<RawMessage>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic fetch failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn record_mentions(&self, message_id: &str, user_ids: &[String]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Write("synthetic write failure".to_string()));
        }
        self.recorded_mentions
            .lock()
            .unwrap()
            .push((message_id.to_string(), user_ids.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl Directory for TestBackend {
    async fn profiles(&self, user_ids: &[String]) -> Result<Vec<Profile>> {
        self.profile_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic lookup failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }

    async fn attachments(&self, message_ids: &[String]) -> Result<Vec<Attachment>> {
        self.attachment_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic lookup failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(message_ids
            .iter()
            .filter_map(|id| state.attachments.get(id).cloned())
            .flatten()
            .collect())
    }

    async fn mentions(&self, message_ids: &[String]) -> Result<Vec<MentionRecord>> {
        self.mention_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic lookup failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(message_ids
            .iter()
            .flat_map(|id| {
                state
                    .mentions
                    .get(id)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|user_id| MentionRecord {
                        message_id: id.clone(),
                        user_id,
                    })
            })
            .collect())
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::Fetch("synthetic lookup failure".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChangeStream for TestBackend {
    async fn subscribe(&self, conversation_id: &str) -> Result<ChangeSubscription> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(BackendError::Subscription(
                "synthetic subscribe failure".to_string(),
            ));
        }
        let (sender, events) = mpsc::channel(64);
        self.subscriptions
            .insert(conversation_id.to_string(), sender);
        Ok(ChangeSubscription { events })
    }
}

#[async_trait]
impl NotificationDispatcher for TestBackend {
    async fn notify_new_message(
        &self,
        recipient_ids: &[String],
        _conversation_id: &str,
        message_id: &str,
    ) -> Result<()> {
        if self.fail_notifies.load(Ordering::SeqCst) {
            return Err(BackendError::Write("synthetic notify failure".to_string()));
        }
        self.new_message_notifications
            .lock()
            .unwrap()
            .push((recipient_ids.to_vec(), message_id.to_string()));
        Ok(())
    }

    async fn notify_mention(
        &self,
        user_id: &str,
        _conversation_id: &str,
        message_id: &str,
    ) -> Result<()> {
        if self.fail_notifies.load(Ordering::SeqCst) {
            return Err(BackendError::Write("synthetic notify failure".to_string()));
        }
        self.mention_notifications
            .lock()
            .unwrap()
            .push((user_id.to_string(), message_id.to_string()));
        Ok(())
    }
}
