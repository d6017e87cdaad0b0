use thiserror::Error;

/// Errors raised when decoding or validating wire payloads.
///
/// A protocol error always means the message itself is unusable;
/// retrying delivery cannot fix it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON for the expected envelope.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload was valid JSON but not a JSON object.
    #[error("expected a JSON object payload")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A required field is present but has the wrong type or an
    /// out-of-range value.
    #[error("invalid value for field '{0}'")]
    InvalidField(&'static str),
}
