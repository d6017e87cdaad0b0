//! Generic consume → execute → reply loop shared by every
//! participant.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use message_bus::{Disposition, InboundMessage, MessageBus, MessageHandler};
use protocol::{Command, Reply};

use crate::error::ParticipantError;

/// A participant's command processor.
///
/// `execute` runs the local state change and builds the reply.
/// Business rejections come back as `success = false` replies; an
/// `Err` means infrastructure trouble and triggers redelivery.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Short service name, used for logging and metrics labels.
    fn service(&self) -> &'static str;

    /// Executes one command inside a single local transaction.
    async fn execute(&self, command: Command) -> Result<Reply, ParticipantError>;
}

/// Bus adapter wrapping a [`CommandHandler`]: decodes commands,
/// publishes the reply keyed by saga id, and maps failures onto
/// acknowledgement dispositions.
pub struct ParticipantRunner {
    bus: Arc<dyn MessageBus>,
    reply_topic: String,
    handler: Arc<dyn CommandHandler>,
}

impl ParticipantRunner {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        reply_topic: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            bus,
            reply_topic: reply_topic.into(),
            handler,
        }
    }
}

#[async_trait]
impl MessageHandler for ParticipantRunner {
    async fn handle(&self, message: InboundMessage) -> Disposition {
        let command = match Command::from_bytes(&message.payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, topic = %message.topic, "discarding malformed command");
                return Disposition::Ack;
            }
        };

        let saga_id = command.saga_id;
        let command_type = command.command_type;
        tracing::info!(%saga_id, command = %command_type, "command received");
        metrics::counter!("participant_commands_total", "service" => self.handler.service())
            .increment(1);

        let reply = match self.handler.execute(command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    %saga_id,
                    "local transaction failed, leaving command for redelivery"
                );
                return Disposition::Retry;
            }
        };
        if !reply.success {
            tracing::warn!(%saga_id, command = %command_type, message = %reply.message, "command rejected");
        }

        let bytes = match reply.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, %saga_id, "reply serialization failed");
                return Disposition::Retry;
            }
        };
        match self
            .bus
            .publish(&self.reply_topic, &saga_id.to_string(), Bytes::from(bytes))
            .await
        {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    %saga_id,
                    "reply publish failed, leaving command for redelivery"
                );
                Disposition::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, SagaId};
    use message_bus::InMemoryBus;
    use protocol::{CommandType, Context, Reply};

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        fn service(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, command: Command) -> Result<Reply, ParticipantError> {
            Ok(Reply::success(&command, "ok"))
        }
    }

    fn runner(bus: &InMemoryBus) -> Arc<ParticipantRunner> {
        Arc::new(ParticipantRunner::new(
            Arc::new(bus.clone()),
            "echo-reply",
            Arc::new(EchoHandler),
        ))
    }

    #[tokio::test]
    async fn publishes_reply_keyed_by_saga_id() {
        let bus = InMemoryBus::new();
        bus.subscribe(vec!["echo-commands".into()], "echo-group", runner(&bus));

        let command = Command::new(
            SagaId::new(),
            OrderId::new("ORD-1"),
            CommandType::ValidateOrder,
            Context::new(),
        );
        bus.publish(
            "echo-commands",
            &command.saga_id.to_string(),
            Bytes::from(command.to_bytes().unwrap()),
        )
        .await
        .unwrap();

        bus.deliver_pending().await;

        let replies = bus.published("echo-reply");
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].0.as_deref(),
            Some(command.saga_id.to_string().as_str())
        );
        let reply = Reply::from_bytes(&replies[0].1).unwrap();
        assert_eq!(reply.command_id, command.command_id);
        assert!(reply.success);
    }

    #[tokio::test]
    async fn malformed_command_is_acked_and_dropped() {
        let bus = InMemoryBus::new();
        bus.subscribe(vec!["echo-commands".into()], "echo-group", runner(&bus));

        bus.publish("echo-commands", "k", Bytes::from_static(b"{broken"))
            .await
            .unwrap();

        assert_eq!(bus.deliver_pending().await, 1);
        assert_eq!(bus.message_count("echo-reply"), 0);
    }
}
