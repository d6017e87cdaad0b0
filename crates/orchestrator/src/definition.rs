//! The static saga definition.
//!
//! Ordering lives in one table instead of switch-on-topic logic: the
//! state machine is driven by "which step does this reply belong to",
//! and reverse-order compensation falls out of the completed prefix.

use event_log::SagaState;
use protocol::{CommandType, Topics};

/// One forward step of the saga and its defined inverse.
#[derive(Debug, Clone)]
pub struct Step {
    /// Command dispatched to drive this step.
    pub forward: CommandType,
    /// Topic the forward (and compensation) command is addressed to.
    pub command_topic: String,
    /// Topic the participant answers on.
    pub reply_topic: String,
    /// State recorded when the participant reports success.
    pub success_state: SagaState,
    /// Command that undoes this step during compensation.
    pub compensation: CommandType,
}

/// The immutable, ordered step table for order processing.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    steps: Vec<Step>,
}

impl SagaDefinition {
    /// Builds the four-step order-processing definition over the
    /// given topic table.
    pub fn order_processing(topics: &Topics) -> Self {
        Self {
            steps: vec![
                Step {
                    forward: CommandType::ValidateOrder,
                    command_topic: topics.orders_commands.clone(),
                    reply_topic: topics.orders_reply.clone(),
                    success_state: SagaState::OrderValidated,
                    compensation: CommandType::CancelOrder,
                },
                Step {
                    forward: CommandType::ReserveStock,
                    command_topic: topics.stock_commands.clone(),
                    reply_topic: topics.stock_reply.clone(),
                    success_state: SagaState::StockReserved,
                    compensation: CommandType::ReleaseStock,
                },
                Step {
                    forward: CommandType::ProcessPayment,
                    command_topic: topics.pay_commands.clone(),
                    reply_topic: topics.pay_reply.clone(),
                    success_state: SagaState::PaymentProcessed,
                    compensation: CommandType::CancelPayment,
                },
                Step {
                    forward: CommandType::ScheduleDelivery,
                    command_topic: topics.deliv_commands.clone(),
                    reply_topic: topics.deliv_reply.clone(),
                    success_state: SagaState::DeliveryScheduled,
                    compensation: CommandType::CancelDelivery,
                },
            ],
        }
    }

    /// The ordered forward steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The step that starts every saga.
    pub fn first(&self) -> &Step {
        &self.steps[0]
    }

    /// Resolves a reply topic to its step and position.
    pub fn step_for_reply(&self, reply_topic: &str) -> Option<(usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.reply_topic == reply_topic)
    }

    /// The step dispatched after the given one, if any.
    pub fn next_after(&self, index: usize) -> Option<&Step> {
        self.steps.get(index + 1)
    }

    /// The state a saga sits in while the given step is in flight.
    pub fn predecessor_state(&self, index: usize) -> SagaState {
        if index == 0 {
            SagaState::Pending
        } else {
            self.steps[index - 1].success_state
        }
    }

    /// The steps to compensate when a failure strikes in `state`:
    /// every completed forward step, in reverse order. Empty when
    /// nothing completed or the state is off the forward path.
    pub fn compensations_from(&self, state: SagaState) -> Vec<&Step> {
        let completed = state.completed_forward_steps().unwrap_or(0);
        self.steps[..completed.min(self.steps.len())]
            .iter()
            .rev()
            .collect()
    }
}
