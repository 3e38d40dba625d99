//! Error types for tandem-sync

use thiserror::Error;

/// Result type alias using tandem-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem-sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence substrate unavailable or full; retryable, data is never dropped
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error from the key-value substrate
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error (malformed or unknown-version persisted document)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network/server failure expected to clear on its own; retried with backoff
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed mutation; permanently fails the entry, never retried
    #[error("Invalid mutation: {0}")]
    Validation(String),

    /// Credentials expired; all submissions pause until re-authentication
    #[error("Authentication expired")]
    AuthExpired,

    /// Entry or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the queue manager should retry the operation with backoff.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Storage(_))
    }
}
