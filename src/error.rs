use thiserror::Error;

/// Errors raised by the collaboration coordinator and its transports
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("Invalid channel name '{0}'")]
    InvalidChannel(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel '{0}' is not subscribed")]
    NotSubscribed(String),

    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Editor is read-only")]
    ReadOnly,

    #[error("Cursor offset {offset} out of range for document of length {len}")]
    CursorOutOfRange { offset: usize, len: usize },

    #[error("Selection start {start} is after end {end}")]
    InvalidSelection { start: usize, end: usize },

    #[error("Echo guard rejected transition: {0}")]
    EchoGuard(&'static str),

    #[error("Session has shut down")]
    SessionClosed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CollabError>;
