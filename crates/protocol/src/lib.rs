//! Wire types for the order-processing saga.
//!
//! Commands flow from the orchestrator to participants, replies flow
//! back, and both carry a JSON-object context that accumulates data
//! as the saga progresses. Known keys are validated at the ingress
//! boundary; everything else is carried opaquely.

pub mod command;
pub mod context;
pub mod error;
pub mod ingress;
pub mod outcome;
pub mod reply;
pub mod topics;

pub use command::{Command, CommandType};
pub use context::Context;
pub use error::ProtocolError;
pub use ingress::OrderRequest;
pub use outcome::{OutcomeStatus, SagaOutcome};
pub use reply::Reply;
pub use topics::Topics;
