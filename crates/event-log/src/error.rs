use common::SagaId;
use thiserror::Error;

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// No events have been recorded for the saga.
    #[error("no events recorded for saga {0}")]
    SagaNotFound(SagaId),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored state value did not parse.
    #[error("corrupt state value '{0}'")]
    CorruptState(String),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
