//! Orders participant: validates orders and cancels them on
//! compensation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{OrderId, SagaId};
use protocol::{Command, CommandType, Reply, context};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ParticipantError;
use crate::runner::CommandHandler;

/// Local order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Validated,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ParticipantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALIDATED" => Ok(OrderStatus::Validated),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(ParticipantError::CorruptStatus(other.to_string())),
        }
    }
}

/// The orders service's local record.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub customer_id: String,
    pub address: String,
    pub status: OrderStatus,
}

/// Persistence seam for the orders service.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_saga(&self, saga_id: SagaId) -> Result<Option<OrderRecord>, ParticipantError>;
    async fn insert(&self, record: OrderRecord) -> Result<(), ParticipantError>;
    /// Marks the saga's order cancelled. A no-op when no order
    /// exists, which keeps compensation idempotent.
    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError>;
}

/// Handles VALIDATE_ORDER and CANCEL_ORDER.
pub struct OrdersHandler<S> {
    store: S,
}

impl<S: OrderStore> OrdersHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn validate(&self, command: Command) -> Result<Reply, ParticipantError> {
        if let Some(existing) = self.store.find_by_saga(command.saga_id).await? {
            tracing::debug!(saga_id = %command.saga_id, "order already validated, echoing");
            return Ok(Reply::success(&command, "order validated").with_data(
                "order_id",
                serde_json::Value::String(existing.order_id.to_string()),
            ));
        }

        let payload = &command.payload;
        let customer_id = context::get_str(payload, "customer_id").unwrap_or_default();
        let address = context::get_str(payload, "address").unwrap_or_default();
        if customer_id.is_empty() || address.is_empty() {
            return Ok(Reply::failure(
                &command,
                "invalid order: customer_id and address are required",
            ));
        }
        if context::get_u64(payload, "quantity").is_none_or(|q| q == 0) {
            return Ok(Reply::failure(&command, "invalid order: bad quantity"));
        }
        if context::get_f64(payload, "total_amount").is_none_or(|a| a <= 0.0) {
            return Ok(Reply::failure(&command, "invalid order: bad total_amount"));
        }

        self.store
            .insert(OrderRecord {
                order_id: command.order_id.clone(),
                saga_id: command.saga_id,
                customer_id: customer_id.to_string(),
                address: address.to_string(),
                status: OrderStatus::Validated,
            })
            .await?;
        tracing::info!(saga_id = %command.saga_id, order_id = %command.order_id, "order validated");

        Ok(Reply::success(&command, "order validated"))
    }

    async fn cancel(&self, command: Command) -> Result<Reply, ParticipantError> {
        self.store.cancel_by_saga(command.saga_id).await?;
        tracing::info!(saga_id = %command.saga_id, "order cancelled");
        Ok(Reply::success(&command, "order cancelled"))
    }
}

#[async_trait]
impl<S: OrderStore> CommandHandler for OrdersHandler<S> {
    fn service(&self) -> &'static str {
        "orders"
    }

    async fn execute(&self, command: Command) -> Result<Reply, ParticipantError> {
        match command.command_type {
            CommandType::ValidateOrder => self.validate(command).await,
            CommandType::CancelOrder => self.cancel(command).await,
            other => Ok(Reply::failure(&command, format!("unknown command: {other}"))),
        }
    }
}

/// In-memory order store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    records: Arc<RwLock<HashMap<SagaId, OrderRecord>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders recorded.
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Status of the saga's order, if one exists.
    pub fn status_for(&self, saga_id: SagaId) -> Option<OrderStatus> {
        self.records.read().unwrap().get(&saga_id).map(|r| r.status)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_saga(&self, saga_id: SagaId) -> Result<Option<OrderRecord>, ParticipantError> {
        Ok(self.records.read().unwrap().get(&saga_id).cloned())
    }

    async fn insert(&self, record: OrderRecord) -> Result<(), ParticipantError> {
        self.records.write().unwrap().insert(record.saga_id, record);
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        if let Some(record) = self.records.write().unwrap().get_mut(&saga_id) {
            record.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bootstraps the service's local table.
    pub async fn init_schema(&self) -> Result<(), ParticipantError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id VARCHAR(100) PRIMARY KEY,
                saga_id UUID NOT NULL,
                customer_id VARCHAR(100) NOT NULL,
                address TEXT NOT NULL,
                status VARCHAR(50) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_orders_saga_id ON orders (saga_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn find_by_saga(&self, saga_id: SagaId) -> Result<Option<OrderRecord>, ParticipantError> {
        let row = sqlx::query(
            "SELECT order_id, saga_id, customer_id, address, status FROM orders WHERE saga_id = $1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(OrderRecord {
                order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
                saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
                customer_id: row.try_get("customer_id")?,
                address: row.try_get("address")?,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn insert(&self, record: OrderRecord) -> Result<(), ParticipantError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, saga_id, customer_id, address, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(record.order_id.as_str())
        .bind(record.saga_id.as_uuid())
        .bind(&record.customer_id)
        .bind(&record.address)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        sqlx::query("UPDATE orders SET status = $1 WHERE saga_id = $2")
            .bind(OrderStatus::Cancelled.as_str())
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Context;
    use serde_json::json;

    fn command(command_type: CommandType) -> Command {
        let mut payload = Context::new();
        payload.insert("order_id".into(), json!("ORD-1"));
        payload.insert("customer_id".into(), json!("CUST-1"));
        payload.insert("product_id".into(), json!("P-1"));
        payload.insert("quantity".into(), json!(2));
        payload.insert("total_amount".into(), json!(199.98));
        payload.insert("address".into(), json!("A1"));
        Command::new(SagaId::new(), OrderId::new("ORD-1"), command_type, payload)
    }

    #[tokio::test]
    async fn validate_records_the_order() {
        let store = InMemoryOrderStore::new();
        let handler = OrdersHandler::new(store.clone());

        let cmd = command(CommandType::ValidateOrder);
        let reply = handler.execute(cmd.clone()).await.unwrap();

        assert!(reply.success);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.status_for(cmd.saga_id), Some(OrderStatus::Validated));
        // Context keys survive in the reply.
        assert_eq!(reply.data.get("customer_id"), Some(&json!("CUST-1")));
    }

    #[tokio::test]
    async fn duplicate_validate_does_not_double_insert() {
        let store = InMemoryOrderStore::new();
        let handler = OrdersHandler::new(store.clone());

        let cmd = command(CommandType::ValidateOrder);
        handler.execute(cmd.clone()).await.unwrap();
        let reply = handler.execute(cmd.clone()).await.unwrap();

        assert!(reply.success);
        assert_eq!(store.record_count(), 1);
        assert_eq!(reply.data.get("order_id"), Some(&json!("ORD-1")));
    }

    #[tokio::test]
    async fn missing_customer_is_a_business_failure() {
        let handler = OrdersHandler::new(InMemoryOrderStore::new());

        let mut cmd = command(CommandType::ValidateOrder);
        cmd.payload.remove("customer_id");
        let reply = handler.execute(cmd).await.unwrap();

        assert!(!reply.success);
        assert!(reply.message.contains("invalid order"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_tolerates_missing_state() {
        let store = InMemoryOrderStore::new();
        let handler = OrdersHandler::new(store.clone());

        let validate = command(CommandType::ValidateOrder);
        let saga_id = validate.saga_id;
        handler.execute(validate.clone()).await.unwrap();

        let mut cancel = command(CommandType::CancelOrder);
        cancel.saga_id = saga_id;
        assert!(handler.execute(cancel.clone()).await.unwrap().success);
        assert!(handler.execute(cancel).await.unwrap().success);
        assert_eq!(store.status_for(saga_id), Some(OrderStatus::Cancelled));

        // Compensating a saga with no local state still succeeds.
        let orphan = command(CommandType::CancelOrder);
        assert!(handler.execute(orphan).await.unwrap().success);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let handler = OrdersHandler::new(InMemoryOrderStore::new());
        let reply = handler
            .execute(command(CommandType::ReserveStock))
            .await
            .unwrap();
        assert!(!reply.success);
        assert!(reply.message.contains("unknown command"));
    }
}
