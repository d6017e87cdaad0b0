//! Append-only persistence for saga state transitions.
//!
//! The event log is the single source of truth for a saga's current
//! state: the latest appended event is authoritative, events are never
//! updated or deleted, and recovery replays nothing more than a
//! `latest_state` lookup plus bus redelivery.

mod error;
mod event;
mod memory;
mod postgres;
mod store;

pub use error::{EventLogError, Result};
pub use event::{NewSagaEvent, SagaEvent, SagaState};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use store::EventLog;
