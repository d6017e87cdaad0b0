//! NATS JetStream bus adapter.
//!
//! Each topic maps to a JetStream stream covering the subjects
//! `{topic}.>`; the partition key becomes the subject suffix, so
//! messages sharing a key share a subject and are stored and
//! delivered in FIFO order. Consumer groups map to durable pull
//! consumers with explicit acks: an unacked (NAKed) message is
//! redelivered, which gives the at-least-once contract the
//! orchestrator relies on.

use std::collections::HashSet;
use std::sync::Arc;

use async_nats::jetstream::{self, AckKind, consumer::AckPolicy, consumer::pull, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::bus::{Disposition, InboundMessage, MessageBus, MessageHandler};
use crate::error::BusError;

/// JetStream-backed implementation of [`MessageBus`].
#[derive(Clone)]
pub struct NatsBus {
    context: jetstream::Context,
    ensured: Arc<Mutex<HashSet<String>>>,
}

impl NatsBus {
    /// Connects to a NATS server.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    /// Wraps an already connected client.
    pub fn from_client(client: async_nats::Client) -> Self {
        Self {
            context: jetstream::new(client),
            ensured: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    async fn ensure_stream(&self, topic: &str) -> Result<stream::Stream, BusError> {
        self.context
            .get_or_create_stream(stream::Config {
                name: topic.to_string(),
                subjects: vec![format!("{topic}.>")],
                retention: stream::RetentionPolicy::Limits,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn ensure_stream_once(&self, topic: &str) -> Result<(), BusError> {
        let mut ensured = self.ensured.lock().await;
        if !ensured.contains(topic) {
            self.ensure_stream(topic).await?;
            ensured.insert(topic.to_string());
        }
        Ok(())
    }
}

fn consumer_name(group: &str, topic: &str) -> String {
    format!("{group}--{topic}")
}

fn partition_key(subject: &str, topic: &str) -> Option<String> {
    subject
        .strip_prefix(topic)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(str::to_string)
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError> {
        self.ensure_stream_once(topic).await?;

        let publish_error = |e: String| BusError::Publish {
            topic: topic.to_string(),
            reason: e,
        };
        let ack = self
            .context
            .publish(format!("{topic}.{key}"), payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        ack.await.map_err(|e| publish_error(e.to_string()))?;
        Ok(())
    }

    async fn consume(
        &self,
        topics: Vec<String>,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        let mut workers = Vec::with_capacity(topics.len());

        for topic in topics {
            let stream = self.ensure_stream(&topic).await?;
            let name = consumer_name(group, &topic);
            let consumer = stream
                .get_or_create_consumer(
                    &name,
                    pull::Config {
                        durable_name: Some(name.clone()),
                        ack_policy: AckPolicy::Explicit,
                        filter_subject: format!("{topic}.>"),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
            let mut messages = consumer
                .messages()
                .await
                .map_err(|e| BusError::Subscribe(e.to_string()))?;

            let handler = handler.clone();
            workers.push(tokio::spawn(async move {
                while let Some(next) = messages.next().await {
                    let message = match next {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!(error = %e, topic = %topic, "failed to pull message");
                            continue;
                        }
                    };

                    let inbound = InboundMessage {
                        topic: topic.clone(),
                        key: partition_key(message.subject.as_str(), &topic),
                        payload: message.payload.clone(),
                    };
                    let ack_result = match handler.handle(inbound).await {
                        Disposition::Ack => message.ack().await,
                        Disposition::Retry => message.ack_with(AckKind::Nak(None)).await,
                    };
                    if let Err(e) = ack_result {
                        tracing::error!(error = %e, topic = %topic, "acknowledgement failed");
                    }
                }
            }));
        }

        futures::future::join_all(workers).await;
        Ok(())
    }
}
