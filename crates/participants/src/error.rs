use thiserror::Error;

/// Infrastructure errors inside a participant.
///
/// Business rejections are not errors: they travel back to the
/// orchestrator as `success = false` replies. An error here means the
/// local transaction could not run at all, so no reply is sent and
/// the command stays unacked for redelivery.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status value did not parse.
    #[error("corrupt status value '{0}'")]
    CorruptStatus(String),
}
