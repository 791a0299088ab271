use std::path::PathBuf;

/// Core error type for the relay bot.
///
/// Adapter crates map their library errors into this type so the session
/// manager and router can decide consistently between reconnect, drop, and exit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("credential store error: {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether the failure came from the completion backend.
    pub fn is_completion(&self) -> bool {
        matches!(self, Error::Completion(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
