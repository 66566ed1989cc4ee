//! Error types for the earpiece assistant

use thiserror::Error;

/// Result type alias for earpiece operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the earpiece assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or route error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech capture (STT) error
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech synthesis (TTS) error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Store returned something unusable
    #[error("store error: {0}")]
    Store(String),

    /// Remote unreachable and no usable offline copy
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the error means the store could not be reached at all
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
