//! Stock participant: reserves stock and releases it on
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

/// Largest quantity a single order may reserve; larger requests are
/// rejected as insufficient stock.
pub const DEFAULT_MAX_QUANTITY: u64 = 100;

/// Local reservation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Reserved,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Released => "RELEASED",
        }
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = ParticipantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(ReservationStatus::Reserved),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(ParticipantError::CorruptStatus(other.to_string())),
        }
    }
}

/// The stock service's local record.
#[derive(Debug, Clone)]
pub struct StockReservation {
    pub reservation_id: String,
    pub saga_id: SagaId,
    pub product_id: String,
    pub quantity: i64,
    pub status: ReservationStatus,
}

/// Persistence seam for the stock service.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<StockReservation>, ParticipantError>;
    async fn insert(&self, reservation: StockReservation) -> Result<(), ParticipantError>;
    /// Marks the saga's reservation released. A no-op when none
    /// exists, which keeps compensation idempotent.
    async fn release_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError>;
}

/// Handles RESERVE_STOCK and RELEASE_STOCK.
pub struct StockHandler<S> {
    store: S,
    max_quantity: u64,
}

impl<S: StockStore> StockHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_quantity: DEFAULT_MAX_QUANTITY,
        }
    }

    /// Overrides the per-order quantity limit.
    pub fn with_max_quantity(mut self, max_quantity: u64) -> Self {
        self.max_quantity = max_quantity;
        self
    }

    async fn reserve(&self, command: Command) -> Result<Reply, ParticipantError> {
        if let Some(existing) = self.store.find_by_saga(command.saga_id).await? {
            tracing::debug!(saga_id = %command.saga_id, "stock already reserved, echoing");
            return Ok(Reply::success(&command, "stock reserved").with_data(
                "reservation_id",
                serde_json::Value::String(existing.reservation_id),
            ));
        }

        let Some(quantity) = context::get_u64(&command.payload, "quantity") else {
            return Ok(Reply::failure(&command, "missing quantity"));
        };
        if quantity == 0 || quantity > self.max_quantity {
            return Ok(Reply::failure(
                &command,
                format!("insufficient stock for quantity {quantity}"),
            ));
        }

        let reservation_id = format!("RES-{}", Uuid::new_v4().simple());
        self.store
            .insert(StockReservation {
                reservation_id: reservation_id.clone(),
                saga_id: command.saga_id,
                product_id: context::get_str(&command.payload, "product_id")
                    .unwrap_or_default()
                    .to_string(),
                quantity: quantity as i64,
                status: ReservationStatus::Reserved,
            })
            .await?;
        tracing::info!(saga_id = %command.saga_id, %reservation_id, quantity, "stock reserved");

        Ok(Reply::success(&command, "stock reserved")
            .with_data("reservation_id", serde_json::Value::String(reservation_id)))
    }

    async fn release(&self, command: Command) -> Result<Reply, ParticipantError> {
        self.store.release_by_saga(command.saga_id).await?;
        tracing::info!(saga_id = %command.saga_id, "stock released");
        Ok(Reply::success(&command, "stock released"))
    }
}

#[async_trait]
impl<S: StockStore> CommandHandler for StockHandler<S> {
    fn service(&self) -> &'static str {
        "stock"
    }

    async fn execute(&self, command: Command) -> Result<Reply, ParticipantError> {
        match command.command_type {
            CommandType::ReserveStock => self.reserve(command).await,
            CommandType::ReleaseStock => self.release(command).await,
            other => Ok(Reply::failure(&command, format!("unknown command: {other}"))),
        }
    }
}

/// In-memory stock store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    reservations: Arc<RwLock<HashMap<SagaId, StockReservation>>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reservations recorded.
    pub fn record_count(&self) -> usize {
        self.reservations.read().unwrap().len()
    }

    /// Status of the saga's reservation, if one exists.
    pub fn status_for(&self, saga_id: SagaId) -> Option<ReservationStatus> {
        self.reservations
            .read()
            .unwrap()
            .get(&saga_id)
            .map(|r| r.status)
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<StockReservation>, ParticipantError> {
        Ok(self.reservations.read().unwrap().get(&saga_id).cloned())
    }

    async fn insert(&self, reservation: StockReservation) -> Result<(), ParticipantError> {
        self.reservations
            .write()
            .unwrap()
            .insert(reservation.saga_id, reservation);
        Ok(())
    }

    async fn release_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        if let Some(reservation) = self.reservations.write().unwrap().get_mut(&saga_id) {
            reservation.status = ReservationStatus::Released;
        }
        Ok(())
    }
}

/// PostgreSQL-backed stock store.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bootstraps the service's local table.
    pub async fn init_schema(&self) -> Result<(), ParticipantError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS stock_reservations (
                reservation_id VARCHAR(100) PRIMARY KEY,
                saga_id UUID NOT NULL,
                product_id VARCHAR(100) NOT NULL,
                quantity BIGINT NOT NULL,
                status VARCHAR(50) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_stock_reservations_saga_id
                ON stock_reservations (saga_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn find_by_saga(
        &self,
        saga_id: SagaId,
    ) -> Result<Option<StockReservation>, ParticipantError> {
        let row = sqlx::query(
            r#"
            SELECT reservation_id, saga_id, product_id, quantity, status
            FROM stock_reservations
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            Ok(StockReservation {
                reservation_id: row.try_get("reservation_id")?,
                saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
                product_id: row.try_get("product_id")?,
                quantity: row.try_get("quantity")?,
                status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn insert(&self, reservation: StockReservation) -> Result<(), ParticipantError> {
        sqlx::query(
            r#"
            INSERT INTO stock_reservations (reservation_id, saga_id, product_id, quantity, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (reservation_id) DO NOTHING
            "#,
        )
        .bind(&reservation.reservation_id)
        .bind(reservation.saga_id.as_uuid())
        .bind(&reservation.product_id)
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_by_saga(&self, saga_id: SagaId) -> Result<(), ParticipantError> {
        sqlx::query("UPDATE stock_reservations SET status = $1 WHERE saga_id = $2")
            .bind(ReservationStatus::Released.as_str())
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
