//! Reply envelopes sent from participants back to the orchestrator.

use chrono::{DateTime, Utc};
use common::{CommandId, ReplyId, SagaId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::context::Context;
use crate::error::ProtocolError;

/// A participant's response to a command.
///
/// `data` starts as a copy of the command payload so no context is
/// lost, and participants add the keys downstream steps need
/// (reservation ids, payment ids, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub reply_id: ReplyId,
    pub command_id: CommandId,
    pub saga_id: SagaId,
    pub success: bool,
    pub message: String,
    pub data: Context,
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    /// Creates a success reply echoing the command's payload.
    pub fn success(command: &Command, message: impl Into<String>) -> Self {
        Self {
            reply_id: ReplyId::new(),
            command_id: command.command_id,
            saga_id: command.saga_id,
            success: true,
            message: message.into(),
            data: command.payload.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a failure reply echoing the command's payload.
    pub fn failure(command: &Command, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(command, message)
        }
    }

    /// Adds a key to the reply data.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Serializes the envelope for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope received from a reply topic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandType;
    use common::OrderId;
    use serde_json::json;

    fn command() -> Command {
        let mut payload = Context::new();
        payload.insert("order_id".into(), json!("ORD-1"));
        payload.insert("address".into(), json!("A1"));
        Command::new(
            SagaId::new(),
            OrderId::new("ORD-1"),
            CommandType::ReserveStock,
            payload,
        )
    }

    #[test]
    fn success_echoes_command_identity_and_payload() {
        let cmd = command();
        let reply = Reply::success(&cmd, "stock reserved")
            .with_data("reservation_id", json!("RES-1"));

        assert!(reply.success);
        assert_eq!(reply.command_id, cmd.command_id);
        assert_eq!(reply.saga_id, cmd.saga_id);
        assert_eq!(reply.data.get("address"), Some(&json!("A1")));
        assert_eq!(reply.data.get("reservation_id"), Some(&json!("RES-1")));
    }

    #[test]
    fn failure_keeps_payload_but_flips_success() {
        let cmd = command();
        let reply = Reply::failure(&cmd, "insufficient stock");
        assert!(!reply.success);
        assert_eq!(reply.message, "insufficient stock");
        assert_eq!(reply.data.get("order_id"), Some(&json!("ORD-1")));
    }

    #[test]
    fn reply_roundtrip() {
        let reply = Reply::success(&command(), "ok");
        let decoded = Reply::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.reply_id, reply.reply_id);
        assert_eq!(decoded.success, reply.success);
    }
}
