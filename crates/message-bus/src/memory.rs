use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::bus::{Disposition, InboundMessage, MessageBus, MessageHandler};
use crate::error::BusError;

/// Cap on redelivery attempts per (group, topic) within one pump
/// call, so a handler that keeps failing cannot spin the pump forever.
const MAX_ATTEMPTS_PER_PUMP: usize = 10;

/// In-memory log-structured bus for testing.
///
/// Each topic is an append-only message log; consumer groups track an
/// offset per topic, committed only when the handler acks. A `Retry`
/// disposition leaves the offset in place so the next pump redelivers
/// the same message, mirroring at-least-once semantics.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<String, Vec<StoredMessage>>,
    offsets: HashMap<(String, String), usize>,
    subscriptions: Vec<Subscription>,
    /// Every publish across all topics, in publish order.
    journal: Vec<(String, StoredMessage)>,
}

#[derive(Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Bytes,
}

#[derive(Clone)]
struct Subscription {
    group: String,
    topics: Vec<String>,
    handler: Arc<dyn MessageHandler>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            shutdown: Arc::new(shutdown),
        }
    }
}

impl InMemoryBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer group without blocking; messages are
    /// dispatched by [`deliver_pending`](Self::deliver_pending).
    pub fn subscribe(&self, topics: Vec<String>, group: &str, handler: Arc<dyn MessageHandler>) {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .push(Subscription {
                group: group.to_string(),
                topics,
                handler,
            });
    }

    /// Dispatches every undelivered message to its subscribers until
    /// the bus is quiescent. Returns the number of acked deliveries.
    pub async fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        let mut attempts: HashMap<(String, String), usize> = HashMap::new();

        loop {
            let next = {
                let inner = self.inner.lock().unwrap();
                let mut found = None;
                'scan: for sub in &inner.subscriptions {
                    for topic in &sub.topics {
                        let cursor = (sub.group.clone(), topic.clone());
                        if attempts.get(&cursor).copied().unwrap_or(0) >= MAX_ATTEMPTS_PER_PUMP {
                            continue;
                        }
                        let offset = inner.offsets.get(&cursor).copied().unwrap_or(0);
                        if let Some(log) = inner.logs.get(topic)
                            && offset < log.len()
                        {
                            found = Some((sub.handler.clone(), cursor, log[offset].clone()));
                            break 'scan;
                        }
                    }
                }
                found
            };

            let Some((handler, cursor, message)) = next else {
                break;
            };

            let disposition = handler
                .handle(InboundMessage {
                    topic: cursor.1.clone(),
                    key: message.key,
                    payload: message.payload,
                })
                .await;

            match disposition {
                Disposition::Ack => {
                    *self.inner.lock().unwrap().offsets.entry(cursor.clone()).or_insert(0) += 1;
                    attempts.remove(&cursor);
                    delivered += 1;
                }
                Disposition::Retry => {
                    *attempts.entry(cursor).or_insert(0) += 1;
                }
            }
        }

        delivered
    }

    /// Returns every message published to a topic, in order.
    pub fn published(&self, topic: &str) -> Vec<(Option<String>, Bytes)> {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get(topic)
            .map(|log| {
                log.iter()
                    .map(|m| (m.key.clone(), m.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every publish across all topics as `(topic, payload)`
    /// pairs, in publish order. Useful for asserting cross-topic
    /// ordering such as reverse-order compensation.
    pub fn all_published(&self) -> Vec<(String, Bytes)> {
        self.inner
            .lock()
            .unwrap()
            .journal
            .iter()
            .map(|(topic, m)| (topic.clone(), m.payload.clone()))
            .collect()
    }

    /// Number of messages published to a topic.
    pub fn message_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Unblocks every pending [`MessageBus::consume`] call.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError> {
        let message = StoredMessage {
            key: Some(key.to_string()),
            payload,
        };
        let mut inner = self.inner.lock().unwrap();
        inner
            .logs
            .entry(topic.to_string())
            .or_default()
            .push(message.clone());
        inner.journal.push((topic.to_string(), message));
        Ok(())
    }

    async fn consume(
        &self,
        topics: Vec<String>,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        self.subscribe(topics, group, handler);
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
