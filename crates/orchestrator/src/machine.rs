//! The pure saga state machine.
//!
//! `decide` is deterministic in the triple (current state, reply
//! topic, success flag) and performs no I/O; the engine interprets
//! the returned transition. Duplicate replies resolve to `Ignore` or
//! `Replay`, which is what makes redelivery safe.

use event_log::SagaState;

use crate::definition::{SagaDefinition, Step};

/// The action the engine must take for a reply.
#[derive(Debug)]
pub enum Transition<'a> {
    /// Record the step's success state and dispatch the next forward
    /// command.
    Advance {
        next_state: SagaState,
        dispatch: &'a Step,
    },
    /// The final step succeeded (or its completion is being
    /// redelivered): record any missing terminal events and publish
    /// the outcome.
    Complete,
    /// The transition is already the latest recorded state. A crash
    /// between append and ack and an immediate duplicate delivery
    /// are indistinguishable here (same reply, no dispatch journal),
    /// so the follow-on command is re-dispatched without appending;
    /// participant idempotency absorbs the extra dispatch.
    Replay { dispatch: &'a Step },
    /// A participant failed: compensate every step completed while
    /// standing in `failed_from`.
    Compensate { failed_from: SagaState },
    /// A failure reply redelivered while already COMPENSATING:
    /// re-issue the compensations recorded at failure time and finish
    /// the saga.
    ResumeCompensation,
    /// Duplicate, stale, or unroutable reply; drop it.
    Ignore { reason: &'static str },
}

/// Maps a reply onto the action to take.
pub fn decide<'a>(
    definition: &'a SagaDefinition,
    current: SagaState,
    reply_topic: &str,
    success: bool,
) -> Transition<'a> {
    if !success {
        return match current {
            state if state.is_terminal() => Transition::Ignore {
                reason: "failure reply after terminal state",
            },
            SagaState::Compensating => Transition::ResumeCompensation,
            state => Transition::Compensate { failed_from: state },
        };
    }

    let Some((index, step)) = definition.step_for_reply(reply_topic) else {
        return Transition::Ignore {
            reason: "reply on unknown topic",
        };
    };

    if current == definition.predecessor_state(index) {
        return match definition.next_after(index) {
            Some(next) => Transition::Advance {
                next_state: step.success_state,
                dispatch: next,
            },
            None => Transition::Complete,
        };
    }

    // The transition this reply reports is already recorded; decide
    // between replaying the follow-on dispatch and dropping.
    match definition.next_after(index) {
        Some(next) if current == step.success_state => Transition::Replay { dispatch: next },
        None if current == step.success_state || current == SagaState::Completed => {
            Transition::Complete
        }
        _ => Transition::Ignore {
            reason: "duplicate or stale reply",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{CommandType, Topics};

    fn definition() -> SagaDefinition {
        SagaDefinition::order_processing(&Topics::default())
    }

    fn assert_ignored(transition: Transition<'_>) {
        assert!(
            matches!(transition, Transition::Ignore { .. }),
            "expected Ignore, got {transition:?}"
        );
    }

    #[test]
    fn forward_transitions_follow_the_table() {
        let def = definition();

        match decide(&def, SagaState::Pending, "orders-reply", true) {
            Transition::Advance {
                next_state,
                dispatch,
            } => {
                assert_eq!(next_state, SagaState::OrderValidated);
                assert_eq!(dispatch.forward, CommandType::ReserveStock);
                assert_eq!(dispatch.command_topic, "stock-commands");
            }
            other => panic!("unexpected transition {other:?}"),
        }

        match decide(&def, SagaState::StockReserved, "pay-reply", true) {
            Transition::Advance {
                next_state,
                dispatch,
            } => {
                assert_eq!(next_state, SagaState::PaymentProcessed);
                assert_eq!(dispatch.forward, CommandType::ScheduleDelivery);
            }
            other => panic!("unexpected transition {other:?}"),
        }
    }

    #[test]
    fn final_step_success_completes() {
        let def = definition();
        assert!(matches!(
            decide(&def, SagaState::PaymentProcessed, "deliv-reply", true),
            Transition::Complete
        ));
    }

    #[test]
    fn redelivered_final_reply_still_completes() {
        let def = definition();
        for state in [SagaState::DeliveryScheduled, SagaState::Completed] {
            assert!(matches!(
                decide(&def, state, "deliv-reply", true),
                Transition::Complete
            ));
        }
    }

    #[test]
    fn reply_at_its_own_success_state_replays_the_dispatch() {
        let def = definition();
        match decide(&def, SagaState::OrderValidated, "orders-reply", true) {
            Transition::Replay { dispatch } => {
                assert_eq!(dispatch.forward, CommandType::ReserveStock);
            }
            other => panic!("unexpected transition {other:?}"),
        }
    }

    #[test]
    fn reply_behind_the_saga_is_ignored() {
        let def = definition();
        // Stock reply arriving after payment already advanced.
        assert_ignored(decide(&def, SagaState::PaymentProcessed, "stock-reply", true));
        // Orders reply after completion.
        assert_ignored(decide(&def, SagaState::Completed, "orders-reply", true));
        // Reply ahead of the saga (should be unreachable, still safe).
        assert_ignored(decide(&def, SagaState::Pending, "pay-reply", true));
    }

    #[test]
    fn failure_compensates_from_the_current_state() {
        let def = definition();
        match decide(&def, SagaState::OrderValidated, "stock-reply", false) {
            Transition::Compensate { failed_from } => {
                assert_eq!(failed_from, SagaState::OrderValidated);
            }
            other => panic!("unexpected transition {other:?}"),
        }
    }

    #[test]
    fn failure_while_compensating_resumes() {
        let def = definition();
        assert!(matches!(
            decide(&def, SagaState::Compensating, "stock-reply", false),
            Transition::ResumeCompensation
        ));
    }

    #[test]
    fn anything_after_a_terminal_failure_is_ignored() {
        let def = definition();
        assert_ignored(decide(&def, SagaState::Failed, "orders-reply", false));
        assert_ignored(decide(&def, SagaState::Failed, "orders-reply", true));
        assert_ignored(decide(&def, SagaState::Completed, "deliv-reply", false));
    }

    #[test]
    fn success_while_compensating_is_ignored() {
        let def = definition();
        assert_ignored(decide(&def, SagaState::Compensating, "stock-reply", true));
    }

    #[test]
    fn unknown_reply_topic_is_ignored() {
        let def = definition();
        assert_ignored(decide(&def, SagaState::Pending, "mystery-topic", true));
    }
}
