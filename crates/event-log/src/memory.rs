use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::SagaId;
use protocol::Context;
use tokio::sync::RwLock;

use crate::{EventLog, EventLogError, NewSagaEvent, Result, SagaEvent, SagaState};

/// In-memory event log for testing.
///
/// Stores all events in insertion order and provides the same
/// interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<Vec<SagaEvent>>>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns the ordered list of states recorded for a saga.
    pub async fn states_for(&self, saga_id: SagaId) -> Vec<SagaState> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .map(|e| e.state)
            .collect()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: NewSagaEvent) -> Result<i64> {
        let mut events = self.events.write().await;
        let sequence = events.len() as i64 + 1;
        events.push(SagaEvent {
            sequence,
            saga_id: event.saga_id,
            order_id: event.order_id,
            state: event.state,
            data: event.data,
            error: event.error,
            created_at: Utc::now(),
        });
        Ok(sequence)
    }

    async fn latest_state(&self, saga_id: SagaId) -> Result<(SagaState, Context)> {
        self.events
            .read()
            .await
            .iter()
            .rev()
            .find(|e| e.saga_id == saga_id)
            .map(|e| (e.state, e.data.clone()))
            .ok_or(EventLogError::SagaNotFound(saga_id))
    }

    async fn history(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect())
    }
}
