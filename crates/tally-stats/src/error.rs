//! Error types for the stats service.

use std::io;

/// Result type alias using [`StatsError`].
pub type StatsResult<T> = Result<T, StatsError>;

/// Errors that can occur while ingesting or persisting view events.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database connection could not be established.
    #[error("could not connect to database: {0}")]
    Connect(String),

    /// Push attempted after the flusher stopped accepting writes.
    ///
    /// This is a rejected write, not a transient fault; callers should not retry.
    #[error("flusher disabled")]
    FlusherDisabled,

    /// Identifier generation failed.
    #[error("id generation failed: {0}")]
    IdGeneration(#[from] tally_id::IdError),

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON decoding error.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StatsError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
