//! The synchronization engine root.
//!
//! `Crosstalk` owns the message window for the currently open conversation
//! and wires the components together: pagination, optimistic sends, the
//! reconciliation listener, and enrichment. All window mutation goes
//! through the engine, which is what makes the idempotency and epoch rules
//! sufficient for consistency without locks around the collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod error;
pub mod types;

mod enrichment;
mod listener;
mod outbox;
mod pagination;
mod store;
pub mod streams;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::backend::{ChangeStream, Directory, MessageLog, NotificationDispatcher};

use enrichment::EnrichmentResolver;
use store::ConversationStore;
use streams::UpdateStreamManager;
use types::{Message, NoticeKind, Profile, SyncNotice};

const NOTICE_BUFFER_SIZE: usize = 32;

#[derive(Clone, Debug)]
pub struct CrosstalkConfig {
    /// Number of messages fetched per page.
    pub page_size: usize,

    /// Whether to log each applied change event at debug level.
    pub enable_debug_logging: bool,
}

impl Default for CrosstalkConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            enable_debug_logging: false,
        }
    }
}

/// The collaborator handles the engine is constructed over.
#[derive(Clone)]
pub struct Collaborators {
    pub log: Arc<dyn MessageLog>,
    pub directory: Arc<dyn Directory>,
    pub stream: Arc<dyn ChangeStream>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

/// Mutable state for the one currently open conversation.
///
/// Every async continuation captures the epoch at issue time and re-checks
/// it before touching the store, so results that resolve after a newer
/// `open` are dropped instead of applied to the wrong conversation.
struct Session {
    conversation_id: String,
    epoch: u64,
    store: ConversationStore,
    is_loading: bool,
    self_profile: Option<Profile>,
    listener: Option<JoinHandle<()>>,
}

pub struct Crosstalk {
    pub config: CrosstalkConfig,
    local_user_id: String,
    log: Arc<dyn MessageLog>,
    directory: Arc<dyn Directory>,
    stream: Arc<dyn ChangeStream>,
    notifier: Arc<dyn NotificationDispatcher>,
    resolver: EnrichmentResolver,
    streams: UpdateStreamManager,
    notices: broadcast::Sender<SyncNotice>,
    session: Mutex<Option<Session>>,
    epoch: AtomicU64,
    /// Self-handle for detached tasks (listener, side effects); a task
    /// holding a strong reference would keep a closed engine alive.
    weak: Weak<Crosstalk>,
}

impl std::fmt::Debug for Crosstalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crosstalk")
            .field("config", &self.config)
            .field("local_user_id", &self.local_user_id)
            .field("log", &"<REDACTED>")
            .field("directory", &"<REDACTED>")
            .field("stream", &"<REDACTED>")
            .field("notifier", &"<REDACTED>")
            .finish()
    }
}

impl Crosstalk {
    /// Create an engine for the given local user over the provided
    /// collaborators. No conversation is open until [`Crosstalk::open`].
    pub fn new(
        local_user_id: impl Into<String>,
        collaborators: Collaborators,
        config: CrosstalkConfig,
    ) -> Arc<Self> {
        let Collaborators {
            log,
            directory,
            stream,
            notifier,
        } = collaborators;
        let resolver = EnrichmentResolver::new(log.clone(), directory.clone());
        let (notices, _) = broadcast::channel(NOTICE_BUFFER_SIZE);
        Arc::new_cyclic(|weak| Self {
            config,
            local_user_id: local_user_id.into(),
            log,
            directory,
            stream,
            notifier,
            resolver,
            streams: UpdateStreamManager::new(),
            notices,
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
            weak: weak.clone(),
        })
    }

    /// Open a conversation: tear down the previous subscription, reset the
    /// window, fetch the most recent page, and subscribe to live changes.
    ///
    /// Any in-flight work tied to a previously open conversation is
    /// superseded by the epoch bump and its results are discarded when they
    /// resolve. A failed initial fetch leaves an empty window with
    /// `has_more() == true` so the next [`Crosstalk::load_older`] retries,
    /// and emits a `LoadFailed` notice.
    pub async fn open(&self, conversation_id: &str) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = self.session.lock().unwrap();
            if let Some(previous) = guard.take() {
                if let Some(handle) = previous.listener {
                    handle.abort();
                }
                tracing::debug!(
                    target: "crosstalk::open",
                    "closed conversation {} in favor of {}",
                    previous.conversation_id,
                    conversation_id
                );
            }
            *guard = Some(Session {
                conversation_id: conversation_id.to_string(),
                epoch,
                store: ConversationStore::new(),
                is_loading: true,
                self_profile: None,
                listener: None,
            });
        }

        self.cache_self_profile(epoch).await;
        self.fetch_initial_page(conversation_id, epoch).await;
        self.start_listener(conversation_id, epoch).await;
    }

    /// Unsubscribe and release the window.
    pub fn close(&self) {
        let mut guard = self.session.lock().unwrap();
        if let Some(session) = guard.take() {
            if let Some(handle) = session.listener {
                handle.abort();
            }
            tracing::debug!(
                target: "crosstalk::close",
                "closed conversation {}",
                session.conversation_id
            );
        }
    }

    /// Current ordered window snapshot; empty when no conversation is open.
    pub fn messages(&self) -> Vec<Message> {
        let guard = self.session.lock().unwrap();
        guard
            .as_ref()
            .map(|s| s.store.snapshot())
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|s| s.is_loading).unwrap_or(false)
    }

    /// Whether older messages exist beyond the oldest loaded one. False
    /// when no conversation is open.
    pub fn has_more(&self) -> bool {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|s| s.store.has_more()).unwrap_or(false)
    }

    pub fn open_conversation(&self) -> Option<String> {
        let guard = self.session.lock().unwrap();
        guard.as_ref().map(|s| s.conversation_id.clone())
    }

    /// Live updates for a conversation's window. Subscribing is independent
    /// of which conversation is open.
    pub fn subscribe_updates(
        &self,
        conversation_id: &str,
    ) -> broadcast::Receiver<types::MessageUpdate> {
        self.streams.subscribe(conversation_id)
    }

    /// Toast-equivalent failure notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Run `f` against the session, but only if `epoch` is still current.
    /// Stale continuations get `None` and their results are dropped.
    fn with_session<R>(&self, epoch: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut guard = self.session.lock().unwrap();
        match guard.as_mut() {
            Some(session) if session.epoch == epoch => Some(f(session)),
            _ => None,
        }
    }

    /// Conversation id and epoch of the open session, if any.
    fn session_info(&self) -> Option<(String, u64)> {
        let guard = self.session.lock().unwrap();
        guard
            .as_ref()
            .map(|s| (s.conversation_id.clone(), s.epoch))
    }

    async fn cache_self_profile(&self, epoch: u64) {
        match self.directory.profiles(&[self.local_user_id.clone()]).await {
            Ok(profiles) => {
                let own = profiles
                    .into_iter()
                    .find(|p| p.user_id == self.local_user_id);
                let _ = self.with_session(epoch, |s| s.self_profile = own);
            }
            Err(e) => {
                // provisional messages render without a sender snapshot;
                // the promotion-time enrichment patch fills it in
                tracing::warn!(
                    target: "crosstalk::open",
                    "failed to cache local profile: {}",
                    e
                );
            }
        }
    }

    fn notify_failure(&self, kind: NoticeKind, conversation_id: &str, detail: impl std::fmt::Display) {
        tracing::warn!(
            target: "crosstalk::notice",
            "{:?} in conversation {}: {}",
            kind,
            conversation_id,
            detail
        );
        let _ = self.notices.send(SyncNotice {
            kind,
            conversation_id: conversation_id.to_string(),
            detail: detail.to_string(),
        });
    }
}
