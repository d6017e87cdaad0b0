use thiserror::Error;

/// Errors raised by bus adapters.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the bus.
    #[error("bus connection failed: {0}")]
    Connect(String),

    /// A publish was not acknowledged by the bus.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}
