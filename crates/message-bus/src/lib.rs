//! Message bus adapter over an append-only partitioned log.
//!
//! The adapter hides the underlying bus behind two operations:
//! `publish(topic, key, bytes)` and `consume(topics, group, handler)`.
//! The handler's [`Disposition`] drives acknowledgement: `Ack` commits
//! the consumer-group offset, `Retry` leaves the message for
//! redelivery. Messages sharing a key are delivered in FIFO order to
//! a single consumer, which is what makes per-saga serialization work
//! without locks.

mod bus;
mod error;
mod memory;
mod nats;

pub use bus::{Disposition, InboundMessage, MessageBus, MessageHandler};
pub use error::BusError;
pub use memory::InMemoryBus;
pub use nats::NatsBus;
