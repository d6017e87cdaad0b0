use async_trait::async_trait;
use common::SagaId;
use protocol::Context;

use crate::{NewSagaEvent, Result, SagaEvent, SagaState};

/// Core trait for saga event log implementations.
///
/// The log is strictly append-only: there is no update or delete
/// path, and the latest event for a saga id is the authoritative
/// current state. All implementations must be thread-safe.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event durably and returns its assigned sequence.
    async fn append(&self, event: NewSagaEvent) -> Result<i64>;

    /// Returns the authoritative current state and context snapshot.
    ///
    /// Fails with [`EventLogError::SagaNotFound`] when no events exist
    /// for the saga.
    ///
    /// [`EventLogError::SagaNotFound`]: crate::EventLogError::SagaNotFound
    async fn latest_state(&self, saga_id: SagaId) -> Result<(SagaState, Context)>;

    /// Returns all events for a saga in sequence order, for recovery
    /// and audit.
    async fn history(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>>;
}
