use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use protocol::Context;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{EventLog, EventLogError, NewSagaEvent, Result, SagaEvent, SagaState};

/// PostgreSQL-backed saga event log.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<SagaEvent> {
        let state: String = row.try_get("state")?;
        let data: serde_json::Value = row.try_get("data")?;
        let data = match data {
            serde_json::Value::Object(map) => map,
            _ => Context::new(),
        };

        Ok(SagaEvent {
            sequence: row.try_get("sequence")?,
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
            state: SagaState::from_str(&state)?,
            data,
            error: row.try_get("error")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn append(&self, event: NewSagaEvent) -> Result<i64> {
        let data = serde_json::Value::Object(event.data);
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO saga_events (saga_id, order_id, state, data, error)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sequence
            "#,
        )
        .bind(event.saga_id.as_uuid())
        .bind(event.order_id.as_str())
        .bind(event.state.as_str())
        .bind(&data)
        .bind(&event.error)
        .fetch_one(&self.pool)
        .await?;

        Ok(sequence)
    }

    async fn latest_state(&self, saga_id: SagaId) -> Result<(SagaState, Context)> {
        let row = sqlx::query(
            r#"
            SELECT state, data
            FROM saga_events
            WHERE saga_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EventLogError::SagaNotFound(saga_id))?;

        let state: String = row.try_get("state")?;
        let data: serde_json::Value = row.try_get("data")?;
        let data = match data {
            serde_json::Value::Object(map) => map,
            _ => Context::new(),
        };

        Ok((SagaState::from_str(&state)?, data))
    }

    async fn history(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, saga_id, order_id, state, data, error, created_at
            FROM saga_events
            WHERE saga_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}
