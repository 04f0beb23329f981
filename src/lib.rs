//! Crosstalk keeps a client's view of a conversation's messages consistent
//! with a shared, multi-writer, server-held log.
//!
//! The engine reconciles three actors that all mutate one window: the local
//! optimistic writer, the asynchronous insert/update/delete event feed, and
//! paginated historical fetches. It guarantees no duplicate messages, no
//! lost messages, stable ordering, and graceful degradation on failure,
//! with all collaborator I/O behind the traits in [`backend`].
//!
//! ```rust,ignore
//! let engine = Crosstalk::new("alice", collaborators, CrosstalkConfig::default());
//! engine.open("conversation-1").await;
//! let sent = engine.send("hello", SendOptions::default()).await;
//! let window = engine.messages();
//! ```

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

pub mod backend;
mod crosstalk;

pub use crate::backend::{
    BackendError, ChangeEvent, ChangeStream, ChangeSubscription, Directory, MentionRecord,
    MessageLog, MessageReceipt, NotificationDispatcher, RawMessage,
};
pub use crate::crosstalk::error::{CrosstalkError, Result};
pub use crate::crosstalk::types::{
    Attachment, Message, MessagePatch, MessageUpdate, NoticeKind, Profile, SendOptions,
    SyncNotice, UpdateTrigger,
};
pub use crate::crosstalk::{Collaborators, Crosstalk, CrosstalkConfig};

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the tracing stack: a daily-rolling file layer under `logs_dir`
/// plus a stdout layer, filtered by `RUST_LOG` (default `info`). Safe to
/// call more than once; only the first call takes effect.
pub fn init_tracing(logs_dir: &Path) {
    TRACING_INIT.get_or_init(|| {
        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("crosstalk")
            .filename_suffix("log")
            .build(logs_dir)
            .expect("Failed to create file appender");

        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

        TRACING_GUARDS
            .set(Mutex::new(Some((file_guard, stdout_guard))))
            .ok();

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_layer = Layer::new()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .init();
    });
}
