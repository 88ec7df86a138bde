//! Error types for identifier generation.

/// Errors returned while building a generator or producing an identifier.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The configured epoch lies after the current time.
    #[error("start time {0} is in the future")]
    StartTimeInFuture(chrono::DateTime<chrono::Utc>),

    /// No machine id was configured and none could be derived from a private IPv4 address.
    #[error("no private IPv4 address available to derive a machine id: {0}")]
    NoPrivateAddress(String),

    /// The elapsed time no longer fits in the time field.
    #[error("over the time limit")]
    OverTimeLimit,
}
