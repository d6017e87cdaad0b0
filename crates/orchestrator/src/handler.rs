//! Bus-facing adapter for the engine.

use std::sync::Arc;

use async_trait::async_trait;
use event_log::EventLog;
use message_bus::{Disposition, InboundMessage, MessageBus, MessageHandler};

use crate::engine::Orchestrator;

/// Routes delivered messages into the engine and maps engine errors
/// onto acknowledgement dispositions: transient failures leave the
/// message unacked so redelivery re-drives the handler, malformed
/// messages are acked and dropped.
pub struct OrchestratorHandler<L, B> {
    engine: Arc<Orchestrator<L, B>>,
}

impl<L, B> OrchestratorHandler<L, B> {
    pub fn new(engine: Arc<Orchestrator<L, B>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<L, B> MessageHandler for OrchestratorHandler<L, B>
where
    L: EventLog + 'static,
    B: MessageBus + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Disposition {
        let result = if message.topic == self.engine.topics().ingress {
            self.engine.handle_ingress(&message.payload).await
        } else {
            self.engine
                .handle_reply(&message.topic, &message.payload)
                .await
        };

        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_retriable() => {
                tracing::error!(
                    error = %e,
                    topic = %message.topic,
                    "transient failure, leaving message for redelivery"
                );
                Disposition::Retry
            }
            Err(e) => {
                tracing::warn!(error = %e, topic = %message.topic, "discarding malformed message");
                Disposition::Ack
            }
        }
    }
}
