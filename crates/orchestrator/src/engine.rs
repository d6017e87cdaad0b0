//! The orchestrator engine: ingress handling, reply handling, and
//! compensation dispatch.

use bytes::Bytes;
use chrono::Utc;
use common::{OrderId, SagaId};
use event_log::{EventLog, EventLogError, NewSagaEvent, SagaState};
use message_bus::{BusError, MessageBus};
use protocol::{
    Command, CommandType, Context, ProtocolError, Reply, SagaOutcome, Topics, context, ingress,
};
use serde_json::Value;
use thiserror::Error;

use crate::definition::SagaDefinition;
use crate::machine::{self, Transition};

/// Context key recording which state a failure struck, written on the
/// COMPENSATING snapshot so an interrupted compensation can resume
/// after redelivery.
const FAILED_FROM_KEY: &str = "failed_from";

/// Errors surfaced by the engine's handlers.
///
/// Retriable errors must leave the triggering message unacknowledged;
/// everything else means the message itself is unusable.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl EngineError {
    /// True when redelivery can succeed where this attempt failed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Log(_) | EngineError::Bus(_))
    }
}

/// Drives saga instances from ingress to a terminal state.
///
/// The engine holds no per-saga memory: every decision starts from
/// `latest_state` on the event log, so redelivered messages reproduce
/// the same transition and a restart loses nothing.
pub struct Orchestrator<L, B> {
    log: L,
    bus: B,
    topics: Topics,
    definition: SagaDefinition,
}

impl<L: EventLog, B: MessageBus> Orchestrator<L, B> {
    /// Creates an engine over the given event log and bus.
    pub fn new(log: L, bus: B, topics: Topics) -> Self {
        let definition = SagaDefinition::order_processing(&topics);
        Self {
            log,
            bus,
            topics,
            definition,
        }
    }

    /// The topic table this engine runs against.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// The step table this engine runs against.
    pub fn definition(&self) -> &SagaDefinition {
        &self.definition
    }

    /// Starts a new saga from an ingress order payload.
    #[tracing::instrument(skip_all)]
    pub async fn handle_ingress(&self, payload: &[u8]) -> Result<(), EngineError> {
        let request = ingress::parse_order_request(payload)?;
        let saga_id = SagaId::new();
        tracing::info!(%saga_id, order_id = %request.order_id, "starting saga");
        metrics::counter!("saga_started_total").increment(1);

        self.log
            .append(NewSagaEvent::new(
                saga_id,
                request.order_id.clone(),
                SagaState::Pending,
                request.context.clone(),
            ))
            .await?;

        let first = self.definition.first();
        self.send_command(
            &first.command_topic,
            first.forward,
            saga_id,
            request.order_id,
            request.context,
        )
        .await
    }

    /// Applies a participant reply to the saga it references.
    #[tracing::instrument(skip(self, payload), fields(topic = reply_topic))]
    pub async fn handle_reply(&self, reply_topic: &str, payload: &[u8]) -> Result<(), EngineError> {
        let reply = Reply::from_bytes(payload)?;
        let saga_id = reply.saga_id;

        let (current, stored) = match self.log.latest_state(saga_id).await {
            Ok(latest) => latest,
            Err(EventLogError::SagaNotFound(_)) => {
                tracing::warn!(%saga_id, "reply for unknown saga, dropping");
                metrics::counter!("replies_ignored_total").increment(1);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let context = context::merged(&stored, &reply.data);
        let order_id = context::order_id(&context).unwrap_or_else(|| OrderId::new(""));

        match machine::decide(&self.definition, current, reply_topic, reply.success) {
            Transition::Ignore { reason } => {
                tracing::debug!(%saga_id, state = %current, reason, "reply ignored");
                metrics::counter!("replies_ignored_total").increment(1);
                Ok(())
            }
            Transition::Advance {
                next_state,
                dispatch,
            } => {
                self.log
                    .append(NewSagaEvent::new(
                        saga_id,
                        order_id.clone(),
                        next_state,
                        context.clone(),
                    ))
                    .await?;
                tracing::info!(%saga_id, state = %next_state, "saga advanced");
                self.send_command(
                    &dispatch.command_topic,
                    dispatch.forward,
                    saga_id,
                    order_id,
                    context,
                )
                .await
            }
            Transition::Replay { dispatch } => {
                tracing::info!(
                    %saga_id,
                    state = %current,
                    command = %dispatch.forward,
                    "transition already recorded, re-dispatching"
                );
                self.send_command(
                    &dispatch.command_topic,
                    dispatch.forward,
                    saga_id,
                    order_id,
                    context,
                )
                .await
            }
            Transition::Complete => self.complete(saga_id, order_id, current, context).await,
            Transition::Compensate { failed_from } => {
                self.dispatch_compensation(saga_id, order_id, failed_from, &reply.message, context)
                    .await
            }
            Transition::ResumeCompensation => {
                self.resume_compensation(saga_id, order_id, &reply.message, context)
                    .await
            }
        }
    }

    /// Issues compensations for every completed step in reverse order
    /// and records the saga's failure.
    #[tracing::instrument(skip(self, context))]
    pub async fn dispatch_compensation(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        failed_from: SagaState,
        reason: &str,
        context: Context,
    ) -> Result<(), EngineError> {
        tracing::warn!(%saga_id, failed_from = %failed_from, reason, "participant failed, compensating");

        let mut snapshot = context.clone();
        snapshot.insert(
            FAILED_FROM_KEY.into(),
            Value::String(failed_from.as_str().to_string()),
        );
        self.log
            .append(
                NewSagaEvent::new(saga_id, order_id.clone(), SagaState::Compensating, snapshot)
                    .with_error(reason),
            )
            .await?;

        self.issue_compensations(saga_id, &order_id, failed_from, &context)
            .await?;
        self.finish_failed(saga_id, order_id, reason, context).await
    }

    /// Picks an interrupted compensation back up from the state
    /// recorded on the COMPENSATING snapshot.
    async fn resume_compensation(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        reason: &str,
        mut context: Context,
    ) -> Result<(), EngineError> {
        let failed_from = context
            .remove(FAILED_FROM_KEY)
            .and_then(|v| v.as_str().and_then(|s| s.parse::<SagaState>().ok()));

        match failed_from {
            Some(state) => {
                tracing::warn!(%saga_id, failed_from = %state, "resuming interrupted compensation");
                self.issue_compensations(saga_id, &order_id, state, &context)
                    .await?;
            }
            None => {
                tracing::warn!(
                    %saga_id,
                    "compensation origin missing from snapshot, finishing without re-dispatch"
                );
            }
        }
        self.finish_failed(saga_id, order_id, reason, context).await
    }

    async fn issue_compensations(
        &self,
        saga_id: SagaId,
        order_id: &OrderId,
        failed_from: SagaState,
        context: &Context,
    ) -> Result<(), EngineError> {
        for step in self.definition.compensations_from(failed_from) {
            self.send_command(
                &step.command_topic,
                step.compensation,
                saga_id,
                order_id.clone(),
                context.clone(),
            )
            .await?;
        }
        Ok(())
    }

    async fn finish_failed(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        reason: &str,
        context: Context,
    ) -> Result<(), EngineError> {
        self.log
            .append(
                NewSagaEvent::new(saga_id, order_id.clone(), SagaState::Failed, context.clone())
                    .with_error(reason),
            )
            .await?;
        metrics::counter!("saga_failed_total").increment(1);
        tracing::warn!(%saga_id, %order_id, reason, "saga failed");

        self.publish_outcome(SagaOutcome::failed(saga_id, order_id, context))
            .await
    }

    async fn complete(
        &self,
        saga_id: SagaId,
        order_id: OrderId,
        current: SagaState,
        context: Context,
    ) -> Result<(), EngineError> {
        if current == SagaState::PaymentProcessed {
            self.log
                .append(NewSagaEvent::new(
                    saga_id,
                    order_id.clone(),
                    SagaState::DeliveryScheduled,
                    context.clone(),
                ))
                .await?;
        }
        if current != SagaState::Completed {
            self.log
                .append(NewSagaEvent::new(
                    saga_id,
                    order_id.clone(),
                    SagaState::Completed,
                    context.clone(),
                ))
                .await?;
            metrics::counter!("saga_completed_total").increment(1);
            self.record_duration(saga_id).await;
            tracing::info!(%saga_id, %order_id, "saga completed");
        }
        self.publish_outcome(SagaOutcome::completed(saga_id, order_id, context))
            .await
    }

    async fn record_duration(&self, saga_id: SagaId) {
        if let Ok(history) = self.log.history(saga_id).await
            && let Some(first) = history.first()
        {
            let elapsed = (Utc::now() - first.created_at).num_milliseconds() as f64 / 1000.0;
            metrics::histogram!("saga_duration_seconds").record(elapsed);
        }
    }

    async fn send_command(
        &self,
        topic: &str,
        command_type: CommandType,
        saga_id: SagaId,
        order_id: OrderId,
        payload: Context,
    ) -> Result<(), EngineError> {
        let command = Command::new(saga_id, order_id, command_type, payload);
        let bytes = command.to_bytes()?;
        self.bus
            .publish(topic, &saga_id.to_string(), Bytes::from(bytes))
            .await?;
        tracing::info!(%saga_id, command = %command_type, topic, "command dispatched");
        Ok(())
    }

    async fn publish_outcome(&self, outcome: SagaOutcome) -> Result<(), EngineError> {
        let bytes = outcome.to_bytes()?;
        self.bus
            .publish(
                &self.topics.outcome,
                &outcome.saga_id.to_string(),
                Bytes::from(bytes),
            )
            .await?;
        tracing::info!(saga_id = %outcome.saga_id, status = ?outcome.status, "terminal outcome published");
        Ok(())
    }
}
