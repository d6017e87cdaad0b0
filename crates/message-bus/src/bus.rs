use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::BusError;

/// A message delivered to a consumer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    /// The partition key the message was published with.
    pub key: Option<String>,
    pub payload: Bytes,
}

/// What to do with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing succeeded (or the message is unusable and must not
    /// come back); commit the offset.
    Ack,
    /// A transient failure occurred; leave the message for
    /// redelivery.
    Retry,
}

/// Processes delivered messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Disposition;
}

/// The bus adapter contract.
///
/// Implementations must provide at-least-once delivery per consumer
/// group, durability after `publish` returns, and FIFO delivery of
/// messages sharing a partition key.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message to a topic, routed by the partition key.
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError>;

    /// Consumes the given topics as the named consumer group,
    /// dispatching each message to the handler. Runs until the bus is
    /// shut down or an unrecoverable error occurs.
    async fn consume(
        &self,
        topics: Vec<String>,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError>;
}
