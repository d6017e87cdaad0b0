//! Saga orchestrator for the order-processing workflow.
//!
//! The orchestrator ingests order payloads, drives a fixed four-step
//! saga (orders → stock → payment → delivery) over the message bus,
//! persists every transition to the append-only event log, and
//! compensates completed steps in reverse order when a participant
//! fails. The event log is the single source of truth: no saga state
//! is cached in memory, so a restarted orchestrator picks up exactly
//! where redelivery leaves it.

pub mod config;
pub mod definition;
pub mod engine;
pub mod handler;
pub mod machine;

pub use config::Config;
pub use definition::{SagaDefinition, Step};
pub use engine::{EngineError, Orchestrator};
pub use handler::OrchestratorHandler;
pub use machine::{Transition, decide};
