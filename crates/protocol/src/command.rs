//! Command envelopes sent from the orchestrator to participants.

use chrono::{DateTime, Utc};
use common::{CommandId, OrderId, SagaId};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::ProtocolError;

/// The closed set of command types a participant may receive.
///
/// Forward commands drive the saga ahead; compensating commands undo
/// a previously successful forward step. Serialized in
/// SCREAMING_SNAKE_CASE on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    ValidateOrder,
    ReserveStock,
    ProcessPayment,
    ScheduleDelivery,
    CancelOrder,
    ReleaseStock,
    CancelPayment,
    CancelDelivery,
}

impl CommandType {
    /// Returns true for the compensating half of the set.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            CommandType::CancelOrder
                | CommandType::ReleaseStock
                | CommandType::CancelPayment
                | CommandType::CancelDelivery
        )
    }

    /// Returns the wire name of the command type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::ValidateOrder => "VALIDATE_ORDER",
            CommandType::ReserveStock => "RESERVE_STOCK",
            CommandType::ProcessPayment => "PROCESS_PAYMENT",
            CommandType::ScheduleDelivery => "SCHEDULE_DELIVERY",
            CommandType::CancelOrder => "CANCEL_ORDER",
            CommandType::ReleaseStock => "RELEASE_STOCK",
            CommandType::CancelPayment => "CANCEL_PAYMENT",
            CommandType::CancelDelivery => "CANCEL_DELIVERY",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An addressed command envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: CommandId,
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub command_type: CommandType,
    /// Saga context snapshot at dispatch time.
    pub payload: Context,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    /// Creates a command with a fresh id and the current timestamp.
    pub fn new(
        saga_id: SagaId,
        order_id: OrderId,
        command_type: CommandType,
        payload: Context,
    ) -> Self {
        Self {
            command_id: CommandId::new(),
            saga_id,
            order_id,
            command_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Serializes the envelope for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope received from a command topic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
