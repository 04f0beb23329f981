//! Page fetching: the initial window load and historical backfill.
//!
//! The wire order is newest-first so the log can serve "most recent N"
//! cheaply; pages are reversed into ascending order before they are
//! inserted. The pagination cursor is the creation timestamp of the oldest
//! loaded message, which stays correct under concurrent inserts where a
//! numeric offset would drift.

use chrono::{DateTime, Utc};

use crate::backend::Result as BackendResult;

use super::types::{MessageUpdate, NoticeKind, UpdateTrigger};
use super::{Crosstalk, types::Message};

impl Crosstalk {
    /// Load one more page of history below the current window.
    ///
    /// No-op returning `false` while a load is already in flight or when
    /// nothing older remains. Returns `true` once the page is applied. A
    /// fetch failure leaves `has_more()` unchanged so the user can retry,
    /// and emits a `LoadFailed` notice.
    pub async fn load_older(&self) -> bool {
        let pending = {
            let mut guard = self.session.lock().unwrap();
            match guard.as_mut() {
                Some(session) if !session.is_loading && session.store.has_more() => {
                    session.is_loading = true;
                    Some((
                        session.conversation_id.clone(),
                        session.epoch,
                        session.store.oldest_created_at(),
                    ))
                }
                _ => None,
            }
        };
        let Some((conversation_id, epoch, cursor)) = pending else {
            return false;
        };

        match self.fetch_page(&conversation_id, cursor).await {
            Ok((messages, full_page)) => self
                .with_session(epoch, |session| {
                    self.apply_page(&conversation_id, &mut session.store, messages);
                    session.store.set_has_more(full_page);
                    session.is_loading = false;
                })
                .is_some(),
            Err(e) => {
                let _ = self.with_session(epoch, |session| session.is_loading = false);
                self.notify_failure(NoticeKind::LoadFailed, &conversation_id, e);
                false
            }
        }
    }

    /// First page for a freshly opened conversation.
    pub(crate) async fn fetch_initial_page(&self, conversation_id: &str, epoch: u64) {
        match self.fetch_page(conversation_id, None).await {
            Ok((messages, full_page)) => {
                if self.config.enable_debug_logging {
                    tracing::debug!(
                        target: "crosstalk::pagination",
                        "initial page for {}: {} messages, more={}",
                        conversation_id,
                        messages.len(),
                        full_page
                    );
                }
                let _ = self.with_session(epoch, |session| {
                    self.apply_page(conversation_id, &mut session.store, messages);
                    session.store.set_has_more(full_page);
                    session.is_loading = false;
                });
            }
            Err(e) => {
                // leave has_more at its default so load_older can retry
                let _ = self.with_session(epoch, |session| session.is_loading = false);
                self.notify_failure(NoticeKind::LoadFailed, conversation_id, e);
            }
        }
    }

    /// One enriched page in ascending order, plus whether the log may hold
    /// older records still.
    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> BackendResult<(Vec<Message>, bool)> {
        let limit = self.config.page_size;
        let mut page = self.log.list_messages(conversation_id, limit, before).await?;
        let full_page = page.len() == limit;
        page.reverse();
        let enriched = self.resolver.enrich(page).await;
        Ok((enriched, full_page))
    }

    fn apply_page(
        &self,
        conversation_id: &str,
        store: &mut super::store::ConversationStore,
        messages: Vec<Message>,
    ) {
        for message in messages {
            if store.insert(message.clone()) {
                self.streams.emit(
                    conversation_id,
                    MessageUpdate {
                        trigger: UpdateTrigger::MessageAdded,
                        message,
                    },
                );
            }
        }
    }
}
