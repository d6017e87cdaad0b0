//! Delivery participant: schedules deliveries and cancels them on
//! compensation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::SagaId;
use protocol::{Command, CommandType, Reply, context};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ParticipantError;
use crate::runner::CommandHandler;

/// How far out deliveries are scheduled.
const LEAD_TIME_DAYS: i64 = 3;

/// Local delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Scheduled,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Scheduled => "SCHEDULED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = ParticipantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(DeliveryStatus::Scheduled),
            "CANCELLED" => Ok(DeliveryStatus::Cancelled),
            other => Err(ParticipantError::CorruptStatus(other.to_string())),
        }
    }
}

/// The delivery service's local record.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub delivery_id: String,
    pub saga_id: SagaId,
    pub order_id: String,
    pub address: String,
    pub scheduled_date: DateTime<Utc>,
    pub status: DeliveryStatus,
}

/// Persistence seam for the delivery service.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<DeliveryRecord>, ParticipantError>;
    async fn insert(&self, delivery: DeliveryRecord) -> Result<(), ParticipantError>;
    /// Marks the saga's delivery cancelled. A no-op when none exists,
    /// which keeps compensation idempotent.
    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError>;
}

/// Handles SCHEDULE_DELIVERY and CANCEL_DELIVERY.
pub struct DeliveryHandler<S> {
    store: S,
}

impl<S: DeliveryStore> DeliveryHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn schedule(&self, command: Command) -> Result<Reply, ParticipantError> {
        if let Some(existing) = self.store.find_by_saga(command.saga_id).await? {
            tracing::debug!(saga_id = %command.saga_id, "delivery already scheduled, echoing");
            return Ok(Reply::success(&command, "delivery scheduled")
                .with_data("delivery_id", serde_json::Value::String(existing.delivery_id))
                .with_data(
                    "scheduled_date",
                    serde_json::Value::String(existing.scheduled_date.to_rfc3339()),
                ));
        }

        let address = context::get_str(&command.payload, "address").unwrap_or_default();
        if address.is_empty() {
            return Ok(Reply::failure(&command, "missing delivery address"));
        }

        let delivery_id = format!("DEL-{}", Uuid::new_v4().simple());
        let scheduled_date = Utc::now() + Duration::days(LEAD_TIME_DAYS);
        self.store
            .insert(DeliveryRecord {
                delivery_id: delivery_id.clone(),
                saga_id: command.saga_id,
                order_id: command.order_id.to_string(),
                address: address.to_string(),
                scheduled_date,
                status: DeliveryStatus::Scheduled,
            })
            .await?;
        tracing::info!(saga_id = %command.saga_id, %delivery_id, "delivery scheduled");

        Ok(Reply::success(&command, "delivery scheduled")
            .with_data("delivery_id", serde_json::Value::String(delivery_id))
            .with_data(
                "scheduled_date",
                serde_json::Value::String(scheduled_date.to_rfc3339()),
            ))
    }

    async fn cancel(&self, command: Command) -> Result<Reply, ParticipantError> {
        self.store.cancel_by_saga(command.saga_id).await?;
        tracing::info!(saga_id = %command.saga_id, "delivery cancelled");
        Ok(Reply::success(&command, "delivery cancelled"))
    }
}

#[async_trait]
impl<S: DeliveryStore> CommandHandler for DeliveryHandler<S> {
    fn service(&self) -> &'static str {
        "delivery"
    }

    async fn execute(&self, command: Command) -> Result<Reply, ParticipantError> {
        match command.command_type {
            CommandType::ScheduleDelivery => self.schedule(command).await,
            CommandType::CancelDelivery => self.cancel(command).await,
            other => Ok(Reply::failure(&command, format!("unknown command: {other}"))),
        }
    }
}

/// In-memory delivery store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryStore {
    deliveries: Arc<RwLock<HashMap<SagaId, DeliveryRecord>>>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deliveries recorded.
    pub fn record_count(&self) -> usize {
        self.deliveries.read().unwrap().len()
    }

    /// Status of the saga's delivery, if one exists.
    pub fn status_for(&self, saga_id: SagaId) -> Option<DeliveryStatus> {
        self.deliveries
            .read()
            .unwrap()
            .get(&saga_id)
            .map(|d| d.status)
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<DeliveryRecord>, ParticipantError> {
        Ok(self.deliveries.read().unwrap().get(&saga_id).cloned())
    }

    async fn insert(&self, delivery: DeliveryRecord) -> Result<(), ParticipantError> {
        self.deliveries
            .write()
            .unwrap()
            .insert(delivery.saga_id, delivery);
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        if let Some(delivery) = self.deliveries.write().unwrap().get_mut(&saga_id) {
            delivery.status = DeliveryStatus::Cancelled;
        }
        Ok(())
    }
}

/// PostgreSQL-backed delivery store.
#[derive(Clone)]
pub struct PostgresDeliveryStore {
    pool: PgPool,
}

impl PostgresDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bootstraps the service's local table.
    pub async fn init_schema(&self) -> Result<(), ParticipantError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS deliveries (
                delivery_id VARCHAR(100) PRIMARY KEY,
                saga_id UUID NOT NULL,
                order_id VARCHAR(100) NOT NULL,
                address TEXT NOT NULL,
                scheduled_date TIMESTAMPTZ NOT NULL,
                status VARCHAR(50) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_saga_id ON deliveries (saga_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for PostgresDeliveryStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<DeliveryRecord>, ParticipantError> {
        let row = sqlx::query(
            r#"
            SELECT delivery_id, saga_id, order_id, address, scheduled_date, status
            FROM deliveries
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(DeliveryRecord {
                delivery_id: row.try_get("delivery_id")?,
                saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
                order_id: row.try_get("order_id")?,
                address: row.try_get("address")?,
                scheduled_date: row.try_get("scheduled_date")?,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn insert(&self, delivery: DeliveryRecord) -> Result<(), ParticipantError> {
        sqlx::query(
            r#"
            INSERT INTO deliveries (delivery_id, saga_id, order_id, address, scheduled_date, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (delivery_id) DO NOTHING
            "#,
        )
        .bind(&delivery.delivery_id)
        .bind(delivery.saga_id.as_uuid())
        .bind(&delivery.order_id)
        .bind(&delivery.address)
        .bind(delivery.scheduled_date)
        .bind(delivery.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        sqlx::query("UPDATE deliveries SET status = $1 WHERE saga_id = $2")
            .bind(DeliveryStatus::Cancelled.as_str())
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use protocol::Context;
    use serde_json::json;

    fn command(command_type: CommandType) -> Command {
        let mut payload = Context::new();
        payload.insert("order_id".into(), json!("ORD-1"));
        payload.insert("address".into(), json!("A1"));
        Command::new(SagaId::new(), OrderId::new("ORD-1"), command_type, payload)
    }

    #[tokio::test]
    async fn schedule_records_and_returns_delivery_details() {
        let store = InMemoryDeliveryStore::new();
        let handler = DeliveryHandler::new(store.clone());

        let cmd = command(CommandType::ScheduleDelivery);
        let reply = handler.execute(cmd.clone()).await.unwrap();

        assert!(reply.success);
        assert!(reply.data.get("delivery_id").is_some());
        assert!(reply.data.get("scheduled_date").is_some());
        assert_eq!(
            store.status_for(cmd.saga_id),
            Some(DeliveryStatus::Scheduled)
        );
    }

    #[tokio::test]
    async fn duplicate_schedule_echoes_the_same_delivery() {
        let store = InMemoryDeliveryStore::new();
        let handler = DeliveryHandler::new(store.clone());

        let cmd = command(CommandType::ScheduleDelivery);
        let first = handler.execute(cmd.clone()).await.unwrap();
        let second = handler.execute(cmd).await.unwrap();

        assert!(second.success);
        assert_eq!(store.record_count(), 1);
        assert_eq!(first.data.get("delivery_id"), second.data.get("delivery_id"));
    }

    #[tokio::test]
    async fn missing_address_is_a_business_failure() {
        let handler = DeliveryHandler::new(InMemoryDeliveryStore::new());

        let mut cmd = command(CommandType::ScheduleDelivery);
        cmd.payload.remove("address");
        let reply = handler.execute(cmd).await.unwrap();

        assert!(!reply.success);
        assert!(reply.message.contains("address"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_tolerates_missing_state() {
        let store = InMemoryDeliveryStore::new();
        let handler = DeliveryHandler::new(store.clone());

        let schedule = command(CommandType::ScheduleDelivery);
        let saga_id = schedule.saga_id;
        handler.execute(schedule).await.unwrap();

        let mut cancel = command(CommandType::CancelDelivery);
        cancel.saga_id = saga_id;
        assert!(handler.execute(cancel.clone()).await.unwrap().success);
        assert!(handler.execute(cancel).await.unwrap().success);
        assert_eq!(store.status_for(saga_id), Some(DeliveryStatus::Cancelled));

        let orphan = command(CommandType::CancelDelivery);
        assert!(handler.execute(orphan).await.unwrap().success);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let handler = DeliveryHandler::new(InMemoryDeliveryStore::new());
        let reply = handler
            .execute(command(CommandType::ValidateOrder))
            .await
            .unwrap();
        assert!(!reply.success);
        assert!(reply.message.contains("unknown command"));
    }
}
