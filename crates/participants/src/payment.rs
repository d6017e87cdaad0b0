//! Payment participant: charges orders and voids the charge on
//! compensation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::SagaId;
use protocol::{Command, CommandType, Reply, context};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ParticipantError;
use crate::runner::CommandHandler;

/// Largest amount the service authorizes without declining.
pub const DEFAULT_AUTHORIZATION_LIMIT: f64 = 10_000.0;

/// Local payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Approved,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParticipantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVED" => Ok(PaymentStatus::Approved),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            other => Err(ParticipantError::CorruptStatus(other.to_string())),
        }
    }
}

/// The payment service's local record.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub saga_id: SagaId,
    pub order_id: String,
    pub amount: f64,
    pub status: PaymentStatus,
}

/// Persistence seam for the payment service.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_by_saga(&self, saga_id: SagaId)
    -> Result<Option<PaymentRecord>, ParticipantError>;
    async fn insert(&self, payment: PaymentRecord) -> Result<(), ParticipantError>;
    /// Marks the saga's payment cancelled. A no-op when none exists,
    /// which keeps compensation idempotent.
    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError>;
}

/// Handles PROCESS_PAYMENT and CANCEL_PAYMENT.
pub struct PaymentHandler<S> {
    store: S,
    authorization_limit: f64,
}

impl<S: PaymentStore> PaymentHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            authorization_limit: DEFAULT_AUTHORIZATION_LIMIT,
        }
    }

    /// Overrides the authorization limit.
    pub fn with_authorization_limit(mut self, authorization_limit: f64) -> Self {
        self.authorization_limit = authorization_limit;
        self
    }

    async fn charge(&self, command: Command) -> Result<Reply, ParticipantError> {
        if let Some(existing) = self.store.find_by_saga(command.saga_id).await? {
            tracing::debug!(saga_id = %command.saga_id, "payment already processed, echoing");
            return Ok(Reply::success(&command, "payment processed")
                .with_data("payment_id", serde_json::Value::String(existing.payment_id)));
        }

        let Some(amount) = context::get_f64(&command.payload, "total_amount") else {
            return Ok(Reply::failure(&command, "missing total_amount"));
        };
        if amount <= 0.0 || amount > self.authorization_limit {
            return Ok(Reply::failure(
                &command,
                format!("payment declined: amount {amount} exceeds authorization limit"),
            ));
        }

        let payment_id = format!("PAY-{}", Uuid::new_v4().simple());
        self.store
            .insert(PaymentRecord {
                payment_id: payment_id.clone(),
                saga_id: command.saga_id,
                order_id: command.order_id.to_string(),
                amount,
                status: PaymentStatus::Approved,
            })
            .await?;
        tracing::info!(saga_id = %command.saga_id, %payment_id, amount, "payment processed");

        Ok(Reply::success(&command, "payment processed")
            .with_data("payment_id", serde_json::Value::String(payment_id)))
    }

    async fn cancel(&self, command: Command) -> Result<Reply, ParticipantError> {
        self.store.cancel_by_saga(command.saga_id).await?;
        tracing::info!(saga_id = %command.saga_id, "payment cancelled");
        Ok(Reply::success(&command, "payment cancelled"))
    }
}

#[async_trait]
impl<S: PaymentStore> CommandHandler for PaymentHandler<S> {
    fn service(&self) -> &'static str {
        "payment"
    }

    async fn execute(&self, command: Command) -> Result<Reply, ParticipantError> {
        match command.command_type {
            CommandType::ProcessPayment => self.charge(command).await,
            CommandType::CancelPayment => self.cancel(command).await,
            other => Ok(Reply::failure(&command, format!("unknown command: {other}"))),
        }
    }
}

/// In-memory payment store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<SagaId, PaymentRecord>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payments recorded.
    pub fn record_count(&self) -> usize {
        self.payments.read().unwrap().len()
    }

    /// Status of the saga's payment, if one exists.
    pub fn status_for(&self, saga_id: SagaId) -> Option<PaymentStatus> {
        self.payments.read().unwrap().get(&saga_id).map(|p| p.status)
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<PaymentRecord>, ParticipantError> {
        Ok(self.payments.read().unwrap().get(&saga_id).cloned())
    }

    async fn insert(&self, payment: PaymentRecord) -> Result<(), ParticipantError> {
        self.payments.write().unwrap().insert(payment.saga_id, payment);
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        if let Some(payment) = self.payments.write().unwrap().get_mut(&saga_id) {
            payment.status = PaymentStatus::Cancelled;
        }
        Ok(())
    }
}

/// PostgreSQL-backed payment store.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bootstraps the service's local table.
    pub async fn init_schema(&self) -> Result<(), ParticipantError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                payment_id VARCHAR(100) PRIMARY KEY,
                saga_id UUID NOT NULL,
                order_id VARCHAR(100) NOT NULL,
                amount DOUBLE PRECISION NOT NULL,
                status VARCHAR(50) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_payments_saga_id ON payments (saga_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<PaymentRecord>, ParticipantError> {
        let row = sqlx::query(
            "SELECT payment_id, saga_id, order_id, amount, status FROM payments WHERE saga_id = $1",
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(PaymentRecord {
                payment_id: row.try_get("payment_id")?,
                saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
                order_id: row.try_get("order_id")?,
                amount: row.try_get("amount")?,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn insert(&self, payment: PaymentRecord) -> Result<(), ParticipantError> {
        sqlx::query(
            r#"
            INSERT INTO payments (payment_id, saga_id, order_id, amount, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(&payment.payment_id)
        .bind(payment.saga_id.as_uuid())
        .bind(&payment.order_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        sqlx::query("UPDATE payments SET status = $1 WHERE saga_id = $2")
            .bind(PaymentStatus::Cancelled.as_str())
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
