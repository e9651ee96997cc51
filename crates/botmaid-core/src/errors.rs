/// Core error type for BotMaid.
///
/// Adapter crates map their client errors into this type so the dispatcher can
/// decide between "tell the user", "retry later" and "just log it".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Pull/push against a platform failed. The poller retries these forever.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A handler rejected its arguments. The message is shown to the user as is.
    #[error("{0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Text to send back to the originating conversation, if this error is user-facing.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Error::Validation(msg) | Error::Unauthorized(msg) => Some(msg),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
