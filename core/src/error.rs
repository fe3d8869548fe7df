/// Error types for the chat core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted while the connection is not ready
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid connection transition: {0}")]
    InvalidTransition(String),

    /// The store rejected an append; the composed text is handed back for resubmission
    #[error("Write failed: {reason}")]
    WriteFailed {
        reason: String,
        restored_text: String,
    },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Message blocked: {0}")]
    ModerationBlocked(String),

    #[error("Auto-banned from this session")]
    AutoBanned,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Assistant error: {0}")]
    Assistant(String),
}

impl ChatError {
    /// Text the user composed, if this error hands it back
    pub fn restored_text(&self) -> Option<&str> {
        match self {
            ChatError::WriteFailed { restored_text, .. } => Some(restored_text),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
