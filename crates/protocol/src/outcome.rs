//! Terminal outcome envelope published when a saga finishes.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::ProtocolError;

/// How a saga ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// The envelope announced on the outcome topic once a saga reaches a
/// terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaOutcome {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub status: OutcomeStatus,
    pub timestamp: DateTime<Utc>,
    pub data: Context,
}

impl SagaOutcome {
    /// Builds a COMPLETED outcome.
    pub fn completed(saga_id: SagaId, order_id: OrderId, data: Context) -> Self {
        Self::new(saga_id, order_id, OutcomeStatus::Completed, data)
    }

    /// Builds a FAILED outcome.
    pub fn failed(saga_id: SagaId, order_id: OrderId, data: Context) -> Self {
        Self::new(saga_id, order_id, OutcomeStatus::Failed, data)
    }

    fn new(saga_id: SagaId, order_id: OrderId, status: OutcomeStatus, data: Context) -> Self {
        Self {
            saga_id,
            order_id,
            status,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serializes the envelope for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope received from the outcome topic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
