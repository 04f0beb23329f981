use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = core::result::Result<T, CrosstalkError>;

#[derive(Error, Debug)]
pub enum CrosstalkError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Logging setup error: {0}")]
    LoggingSetup(String),

    #[error("No open conversation")]
    ConversationNotOpen,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CrosstalkError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CrosstalkError::Other(anyhow::anyhow!(err.to_string()))
    }
}
