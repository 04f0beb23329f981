//! Reconciliation: applying live change events to the open window.
//!
//! One listener task per open conversation, started by `open` and aborted
//! by `close`/`open(next)`. Events are applied idempotently by id and
//! guarded by the epoch captured at subscribe time, so a late event can
//! never land in the wrong conversation's window. There is no retry loop
//! here: reconnection is the transport's job, and every (re)subscribe is
//! paired with a fresh page fetch that fills whatever the stream missed.

use std::sync::Weak;

use crate::backend::{ChangeEvent, ChangeSubscription, RawMessage};

use super::types::{Message, MessagePatch, MessageUpdate, UpdateTrigger};
use super::Crosstalk;

impl Crosstalk {
    pub(crate) async fn start_listener(&self, conversation_id: &str, epoch: u64) {
        let subscription = match self.stream.subscribe(conversation_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                // not surfaced to the UI; the next open resubscribes and
                // the paired page fetch covers the gap
                tracing::warn!(
                    target: "crosstalk::listener",
                    "subscription to {} failed: {}",
                    conversation_id,
                    e
                );
                return;
            }
        };

        let engine = self.weak.clone();
        let id = conversation_id.to_string();
        let handle = tokio::spawn(async move {
            Self::run_listener(engine, id, epoch, subscription).await;
        });

        let mut guard = self.session.lock().unwrap();
        match guard.as_mut() {
            Some(session) if session.epoch == epoch => session.listener = Some(handle),
            // superseded while subscribing; drop the subscription right away
            _ => handle.abort(),
        }
    }

    async fn run_listener(
        engine: Weak<Crosstalk>,
        conversation_id: String,
        epoch: u64,
        mut subscription: ChangeSubscription,
    ) {
        tracing::debug!(
            target: "crosstalk::listener",
            "listening for changes on {}",
            conversation_id
        );
        while let Some(event) = subscription.events.recv().await {
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.apply_event(&conversation_id, epoch, event);
        }
        tracing::debug!(
            target: "crosstalk::listener",
            "change stream for {} ended",
            conversation_id
        );
    }

    pub(crate) fn apply_event(&self, conversation_id: &str, epoch: u64, event: ChangeEvent) {
        if self.config.enable_debug_logging {
            tracing::debug!(
                target: "crosstalk::listener",
                "change event for {}: {:?}",
                conversation_id,
                event
            );
        }
        match event {
            ChangeEvent::Insert(record) => self.apply_insert(conversation_id, epoch, record),
            ChangeEvent::Update(record) => self.apply_update(conversation_id, epoch, record),
            ChangeEvent::Delete { message_id } => {
                self.apply_delete(conversation_id, epoch, &message_id)
            }
        }
    }

    fn apply_insert(&self, conversation_id: &str, epoch: u64, record: RawMessage) {
        let message = Message::from_raw(record.clone());
        let inserted = self
            .with_session(epoch, |session| {
                // already present: our own promoted send, or a duplicate
                // delivery of the same event
                !session.store.contains(&record.id) && session.store.insert(message.clone())
            })
            .unwrap_or(false);
        if !inserted {
            return;
        }
        self.streams.emit(
            conversation_id,
            MessageUpdate {
                trigger: UpdateTrigger::MessageAdded,
                message,
            },
        );

        // shown un-hydrated first; the lookup patches it in place so the
        // window is never blocked on a round trip for someone else's message
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            engine.hydrate_insert(&conversation_id, epoch, record).await;
        });
    }

    async fn hydrate_insert(&self, conversation_id: &str, epoch: u64, record: RawMessage) {
        let id = record.id.clone();
        let Some(enriched) = self.resolver.enrich(vec![record]).await.into_iter().next() else {
            return;
        };
        let patch = MessagePatch {
            sender: enriched.sender,
            attachments: Some(enriched.attachments),
            mentions: Some(enriched.mentions),
            reply_to: enriched.reply_to,
            ..Default::default()
        };
        let patched = self
            .with_session(epoch, |session| {
                session
                    .store
                    .contains(&id)
                    .then(|| session.store.upsert_by_id(&id, patch))
            })
            .flatten();
        if let Some(message) = patched {
            self.streams.emit(
                conversation_id,
                MessageUpdate {
                    trigger: UpdateTrigger::MessageEnriched,
                    message,
                },
            );
        }
    }

    fn apply_update(&self, conversation_id: &str, epoch: u64, record: RawMessage) {
        let updated = self
            .with_session(epoch, |session| {
                // absent id: the message is outside the loaded window
                session
                    .store
                    .contains(&record.id)
                    .then(|| {
                        session
                            .store
                            .upsert_by_id(&record.id, MessagePatch::from_raw(&record))
                    })
            })
            .flatten();
        if let Some(message) = updated {
            self.streams.emit(
                conversation_id,
                MessageUpdate {
                    trigger: UpdateTrigger::MessageUpdated,
                    message,
                },
            );
        }
    }

    fn apply_delete(&self, conversation_id: &str, epoch: u64, message_id: &str) {
        let removed = self
            .with_session(epoch, |session| session.store.remove_by_id(message_id))
            .flatten();
        if let Some(message) = removed {
            self.streams.emit(
                conversation_id,
                MessageUpdate {
                    trigger: UpdateTrigger::MessageRemoved,
                    message,
                },
            );
        }
    }
}
