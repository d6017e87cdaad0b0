//! Saga states and event records.

use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use protocol::Context;
use serde::{Deserialize, Serialize};

use crate::error::EventLogError;

/// The state of a saga in its lifecycle.
///
/// Forward progression:
/// ```text
/// PENDING ─► ORDER_VALIDATED ─► STOCK_RESERVED ─► PAYMENT_PROCESSED
///         ─► DELIVERY_SCHEDULED ─► COMPLETED
/// ```
/// A failure reply from any non-terminal state moves the saga to
/// COMPENSATING and then FAILED once the compensations are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    Pending,
    OrderValidated,
    StockReserved,
    PaymentProcessed,
    DeliveryScheduled,
    Completed,
    Compensating,
    Failed,
}

impl SagaState {
    /// Returns true once no further events may be appended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Number of forward steps completed when standing in this state,
    /// or `None` off the forward path. Drives reverse-order
    /// compensation.
    pub fn completed_forward_steps(&self) -> Option<usize> {
        match self {
            SagaState::Pending => Some(0),
            SagaState::OrderValidated => Some(1),
            SagaState::StockReserved => Some(2),
            SagaState::PaymentProcessed => Some(3),
            SagaState::DeliveryScheduled => Some(4),
            SagaState::Completed => Some(4),
            SagaState::Compensating | SagaState::Failed => None,
        }
    }

    /// Returns the wire/database name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "PENDING",
            SagaState::OrderValidated => "ORDER_VALIDATED",
            SagaState::StockReserved => "STOCK_RESERVED",
            SagaState::PaymentProcessed => "PAYMENT_PROCESSED",
            SagaState::DeliveryScheduled => "DELIVERY_SCHEDULED",
            SagaState::Completed => "COMPLETED",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SagaState::Pending),
            "ORDER_VALIDATED" => Ok(SagaState::OrderValidated),
            "STOCK_RESERVED" => Ok(SagaState::StockReserved),
            "PAYMENT_PROCESSED" => Ok(SagaState::PaymentProcessed),
            "DELIVERY_SCHEDULED" => Ok(SagaState::DeliveryScheduled),
            "COMPLETED" => Ok(SagaState::Completed),
            "COMPENSATING" => Ok(SagaState::Compensating),
            "FAILED" => Ok(SagaState::Failed),
            other => Err(EventLogError::CorruptState(other.to_string())),
        }
    }
}

/// A persisted saga event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaEvent {
    /// Store-assigned sequence, totally ordered per saga.
    pub sequence: i64,
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub state: SagaState,
    /// Context snapshot at the time of the transition.
    pub data: Context,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An event about to be appended; the store assigns sequence and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewSagaEvent {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub state: SagaState,
    pub data: Context,
    pub error: Option<String>,
}

impl NewSagaEvent {
    /// Creates an event with no error recorded.
    pub fn new(saga_id: SagaId, order_id: OrderId, state: SagaState, data: Context) -> Self {
        Self {
            saga_id,
            order_id,
            state,
            data,
            error: None,
        }
    }

    /// Records the failure reason on the event.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn terminal_states() {
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
        assert!(!SagaState::Pending.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
    }

    #[test]
    fn completed_forward_steps_counts_the_prefix() {
        assert_eq!(SagaState::Pending.completed_forward_steps(), Some(0));
        assert_eq!(SagaState::OrderValidated.completed_forward_steps(), Some(1));
        assert_eq!(
            SagaState::DeliveryScheduled.completed_forward_steps(),
            Some(4)
        );
        assert_eq!(SagaState::Compensating.completed_forward_steps(), None);
        assert_eq!(SagaState::Failed.completed_forward_steps(), None);
    }

    #[test]
    fn wire_form_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&SagaState::OrderValidated).unwrap(),
            "\"ORDER_VALIDATED\""
        );
        let parsed: SagaState = serde_json::from_str("\"STOCK_RESERVED\"").unwrap();
        assert_eq!(parsed, SagaState::StockReserved);
    }

    #[test]
    fn from_str_roundtrips_every_state() {
        for state in [
            SagaState::Pending,
            SagaState::OrderValidated,
            SagaState::StockReserved,
            SagaState::PaymentProcessed,
            SagaState::DeliveryScheduled,
            SagaState::Completed,
            SagaState::Compensating,
            SagaState::Failed,
        ] {
            assert_eq!(SagaState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(SagaState::from_str("BOGUS").is_err());
    }
}
