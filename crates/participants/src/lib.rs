//! The four saga participants: orders, stock, payment and delivery.
//!
//! Each participant consumes its command topic as a dedicated
//! consumer group, applies its local state change in a single
//! transaction, and publishes a reply keyed by saga id. Handlers are
//! idempotent per `(saga_id, command_type)`: redelivered forward
//! commands echo the already-recorded result and redelivered
//! compensations leave the row cancelled, which is what at-least-once
//! delivery demands of them.

pub mod bootstrap;
pub mod delivery;
pub mod error;
pub mod orders;
pub mod payment;
pub mod runner;
pub mod stock;

pub use bootstrap::{ParticipantConfig, ServiceKind, serve};
pub use error::ParticipantError;
pub use runner::{CommandHandler, ParticipantRunner};
