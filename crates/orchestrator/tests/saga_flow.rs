//! End-to-end saga flows against the in-memory bus and event log,
//! with scripted participants.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{OrderId, SagaId};
use event_log::{EventLog, InMemoryEventLog, NewSagaEvent, SagaState};
use message_bus::{Disposition, InboundMessage, InMemoryBus, MessageBus, MessageHandler};
use orchestrator::{Orchestrator, OrchestratorHandler};
use protocol::{Command, CommandType, OutcomeStatus, Reply, SagaOutcome, Topics, context};
use serde_json::json;

/// Scripted participant: replies success unless told to fail a
/// command type.
struct ScriptedParticipant {
    bus: InMemoryBus,
    reply_topic: String,
    fail_on: Option<CommandType>,
}

#[async_trait]
impl MessageHandler for ScriptedParticipant {
    async fn handle(&self, message: InboundMessage) -> Disposition {
        let command = Command::from_bytes(&message.payload).unwrap();
        let reply = if self.fail_on == Some(command.command_type) {
            Reply::failure(&command, format!("{} rejected", command.command_type))
        } else {
            Reply::success(&command, "ok")
        };
        self.bus
            .publish(
                &self.reply_topic,
                &command.saga_id.to_string(),
                Bytes::from(reply.to_bytes().unwrap()),
            )
            .await
            .unwrap();
        Disposition::Ack
    }
}

struct Harness {
    bus: InMemoryBus,
    log: InMemoryEventLog,
    topics: Topics,
    engine: Arc<Orchestrator<InMemoryEventLog, InMemoryBus>>,
}

impl Harness {
    /// Wires the orchestrator; participants reply success except for
    /// the given command type.
    fn new(fail_on: Option<CommandType>) -> Self {
        let harness = Self::orchestrator_only();

        let pairs = [
            (
                harness.topics.orders_commands.clone(),
                harness.topics.orders_reply.clone(),
            ),
            (
                harness.topics.stock_commands.clone(),
                harness.topics.stock_reply.clone(),
            ),
            (
                harness.topics.pay_commands.clone(),
                harness.topics.pay_reply.clone(),
            ),
            (
                harness.topics.deliv_commands.clone(),
                harness.topics.deliv_reply.clone(),
            ),
        ];
        for (command_topic, reply_topic) in pairs {
            let group = format!("{command_topic}-group");
            harness.bus.subscribe(
                vec![command_topic],
                &group,
                Arc::new(ScriptedParticipant {
                    bus: harness.bus.clone(),
                    reply_topic,
                    fail_on,
                }),
            );
        }

        harness
    }

    /// Wires only the orchestrator, for tests that drive the engine
    /// by hand.
    fn orchestrator_only() -> Self {
        let bus = InMemoryBus::new();
        let log = InMemoryEventLog::new();
        let topics = Topics::default();
        let engine = Arc::new(Orchestrator::new(log.clone(), bus.clone(), topics.clone()));
        bus.subscribe(
            topics.orchestrator_topics(),
            "orchestrator-group",
            Arc::new(OrchestratorHandler::new(engine.clone())),
        );
        Self {
            bus,
            log,
            topics,
            engine,
        }
    }

    async fn start_saga(&self) {
        let payload = serde_json::to_vec(&json!({
            "customer_id": "CUST-1",
            "product_id": "P-1",
            "quantity": 2,
            "total_amount": 199.98,
            "address": "A1"
        }))
        .unwrap();
        self.bus
            .publish(&self.topics.ingress, "ingress", Bytes::from(payload))
            .await
            .unwrap();
        self.bus.deliver_pending().await;
    }

    /// The saga id, read off the first dispatched command.
    fn saga_id(&self) -> SagaId {
        let published = self.bus.published(&self.topics.orders_commands);
        Command::from_bytes(&published[0].1).unwrap().saga_id
    }

    fn commands_on(&self, topic: &str) -> Vec<CommandType> {
        self.bus
            .published(topic)
            .iter()
            .map(|(_, payload)| Command::from_bytes(payload).unwrap().command_type)
            .collect()
    }

    /// Compensation commands across all topics, in publish order.
    fn compensations_in_order(&self) -> Vec<CommandType> {
        self.bus
            .all_published()
            .iter()
            .filter_map(|(_, payload)| Command::from_bytes(payload).ok())
            .map(|command| command.command_type)
            .filter(CommandType::is_compensation)
            .collect()
    }

    fn outcomes(&self) -> Vec<SagaOutcome> {
        self.bus
            .published(&self.topics.outcome)
            .iter()
            .map(|(_, payload)| SagaOutcome::from_bytes(payload).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn happy_path_walks_every_state_and_announces_completion() {
    let h = Harness::new(None);
    h.start_saga().await;

    let saga_id = h.saga_id();
    assert_eq!(
        h.log.states_for(saga_id).await,
        vec![
            SagaState::Pending,
            SagaState::OrderValidated,
            SagaState::StockReserved,
            SagaState::PaymentProcessed,
            SagaState::DeliveryScheduled,
            SagaState::Completed,
        ]
    );

    // One forward command per participant, keyed by saga id.
    for topic in [
        &h.topics.orders_commands,
        &h.topics.stock_commands,
        &h.topics.pay_commands,
        &h.topics.deliv_commands,
    ] {
        let published = h.bus.published(topic);
        assert_eq!(published.len(), 1, "expected one command on {topic}");
        assert_eq!(
            published[0].0.as_deref(),
            Some(saga_id.to_string().as_str())
        );
    }

    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Completed);
    assert_eq!(outcomes[0].saga_id, saga_id);

    // Ingress context survives to the terminal event untouched.
    for (key, value) in [
        ("customer_id", json!("CUST-1")),
        ("product_id", json!("P-1")),
        ("quantity", json!(2)),
        ("total_amount", json!(199.98)),
        ("address", json!("A1")),
    ] {
        assert_eq!(outcomes[0].data.get(key), Some(&value), "lost key {key}");
    }
}

#[tokio::test]
async fn stock_failure_compensates_only_the_order() {
    let h = Harness::new(Some(CommandType::ReserveStock));
    h.start_saga().await;

    let saga_id = h.saga_id();
    assert_eq!(
        h.log.states_for(saga_id).await,
        vec![
            SagaState::Pending,
            SagaState::OrderValidated,
            SagaState::Compensating,
            SagaState::Failed,
        ]
    );

    assert_eq!(
        h.commands_on(&h.topics.orders_commands),
        vec![CommandType::ValidateOrder, CommandType::CancelOrder]
    );
    assert_eq!(
        h.commands_on(&h.topics.stock_commands),
        vec![CommandType::ReserveStock]
    );
    assert!(h.commands_on(&h.topics.pay_commands).is_empty());
    assert!(h.commands_on(&h.topics.deliv_commands).is_empty());

    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Failed);

    // The failure reason lands on the persisted events.
    let history = h.log.history(saga_id).await.unwrap();
    let compensating = history
        .iter()
        .find(|e| e.state == SagaState::Compensating)
        .unwrap();
    assert!(compensating.error.as_deref().unwrap().contains("rejected"));
}

#[tokio::test]
async fn payment_failure_compensates_in_reverse_order() {
    let h = Harness::new(Some(CommandType::ProcessPayment));
    h.start_saga().await;

    let saga_id = h.saga_id();
    assert_eq!(
        h.log.states_for(saga_id).await,
        vec![
            SagaState::Pending,
            SagaState::OrderValidated,
            SagaState::StockReserved,
            SagaState::Compensating,
            SagaState::Failed,
        ]
    );

    assert_eq!(
        h.compensations_in_order(),
        vec![CommandType::ReleaseStock, CommandType::CancelOrder]
    );
    assert_eq!(h.outcomes()[0].status, OutcomeStatus::Failed);
}

#[tokio::test]
async fn duplicate_reply_after_advancing_is_dropped() {
    let h = Harness::new(None);
    h.start_saga().await;

    let saga_id = h.saga_id();
    let events_before = h.log.event_count().await;

    // Redeliver the stock reply long after the saga moved on.
    let stock_replies = h.bus.published(&h.topics.stock_reply);
    assert_eq!(stock_replies.len(), 1);
    h.bus
        .publish(
            &h.topics.stock_reply,
            &saga_id.to_string(),
            stock_replies[0].1.clone(),
        )
        .await
        .unwrap();
    h.bus.deliver_pending().await;

    assert_eq!(h.log.event_count().await, events_before);
    let states = h.log.states_for(saga_id).await;
    assert_eq!(
        states
            .iter()
            .filter(|s| **s == SagaState::StockReserved)
            .count(),
        1
    );
    assert_eq!(
        h.commands_on(&h.topics.pay_commands),
        vec![CommandType::ProcessPayment]
    );
}

#[tokio::test]
async fn duplicate_reply_at_the_recorded_state_appends_nothing_but_redispatches() {
    let h = Harness::orchestrator_only();
    h.start_saga().await;

    let saga_id = h.saga_id();
    let validate = Command::from_bytes(&h.bus.published(&h.topics.orders_commands)[0].1).unwrap();
    h.engine
        .handle_reply(
            &h.topics.orders_reply,
            &Reply::success(&validate, "order validated").to_bytes().unwrap(),
        )
        .await
        .unwrap();

    let reserve = Command::from_bytes(&h.bus.published(&h.topics.stock_commands)[0].1).unwrap();
    let stock_reply = Reply::success(&reserve, "stock reserved");
    h.engine
        .handle_reply(&h.topics.stock_reply, &stock_reply.to_bytes().unwrap())
        .await
        .unwrap();

    // The duplicate lands while the saga still sits at
    // STOCK_RESERVED. It cannot be told apart from a crash-window
    // redelivery, so the event log stays single but the follow-on
    // command goes out again; the payment participant's
    // (saga_id, command_type) idempotency keeps the charge single.
    h.engine
        .handle_reply(&h.topics.stock_reply, &stock_reply.to_bytes().unwrap())
        .await
        .unwrap();

    let states = h.log.states_for(saga_id).await;
    assert_eq!(
        states
            .iter()
            .filter(|s| **s == SagaState::StockReserved)
            .count(),
        1
    );
    assert_eq!(
        h.commands_on(&h.topics.pay_commands),
        vec![CommandType::ProcessPayment, CommandType::ProcessPayment]
    );
}

#[tokio::test]
async fn malformed_reply_is_acked_and_leaves_the_saga_untouched() {
    let h = Harness::new(None);
    h.start_saga().await;

    let saga_id = h.saga_id();
    let states_before = h.log.states_for(saga_id).await;

    h.bus
        .publish(&h.topics.pay_reply, "k", Bytes::from_static(b"{not json"))
        .await
        .unwrap();
    // The single delivery is acked, so the pump reports it drained.
    assert_eq!(h.bus.deliver_pending().await, 1);

    assert_eq!(h.log.states_for(saga_id).await, states_before);
}

#[tokio::test]
async fn redelivered_reply_after_crash_reemits_the_next_command() {
    let h = Harness::orchestrator_only();

    // Start a saga and capture the VALIDATE_ORDER dispatch.
    h.start_saga().await;
    let saga_id = h.saga_id();
    let validate = Command::from_bytes(&h.bus.published(&h.topics.orders_commands)[0].1).unwrap();

    // First delivery of the orders reply: records ORDER_VALIDATED and
    // dispatches RESERVE_STOCK.
    let reply = Reply::success(&validate, "order validated");
    h.engine
        .handle_reply(&h.topics.orders_reply, &reply.to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.log.states_for(saga_id).await,
        vec![SagaState::Pending, SagaState::OrderValidated]
    );
    assert_eq!(h.bus.message_count(&h.topics.stock_commands), 1);

    // The crash window: the reply comes back after the append but
    // before the ack. No new event, but the follow-on command is
    // re-dispatched because it may never have gone out.
    h.engine
        .handle_reply(&h.topics.orders_reply, &reply.to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.log.states_for(saga_id).await,
        vec![SagaState::Pending, SagaState::OrderValidated]
    );
    assert_eq!(
        h.commands_on(&h.topics.stock_commands),
        vec![CommandType::ReserveStock, CommandType::ReserveStock]
    );
}

#[tokio::test]
async fn interrupted_compensation_resumes_from_the_recorded_state() {
    let h = Harness::orchestrator_only();

    h.start_saga().await;
    let saga_id = h.saga_id();
    let validate = Command::from_bytes(&h.bus.published(&h.topics.orders_commands)[0].1).unwrap();
    let order_id = validate.order_id.clone();

    let ok = Reply::success(&validate, "order validated");
    h.engine
        .handle_reply(&h.topics.orders_reply, &ok.to_bytes().unwrap())
        .await
        .unwrap();

    // Simulate a crash after the COMPENSATING append but before
    // FAILED: the snapshot carries the state the failure struck.
    let mut snapshot = validate.payload.clone();
    snapshot.insert("failed_from".into(), json!("ORDER_VALIDATED"));
    h.log
        .append(
            NewSagaEvent::new(saga_id, order_id, SagaState::Compensating, snapshot)
                .with_error("insufficient stock"),
        )
        .await
        .unwrap();

    // The stock failure reply is redelivered after the restart.
    let reserve = Command::new(
        saga_id,
        validate.order_id.clone(),
        CommandType::ReserveStock,
        validate.payload.clone(),
    );
    let failure = Reply::failure(&reserve, "insufficient stock");
    h.engine
        .handle_reply(&h.topics.stock_reply, &failure.to_bytes().unwrap())
        .await
        .unwrap();

    let states = h.log.states_for(saga_id).await;
    assert_eq!(states.last(), Some(&SagaState::Failed));
    assert_eq!(
        h.commands_on(&h.topics.orders_commands),
        vec![CommandType::ValidateOrder, CommandType::CancelOrder]
    );
    assert_eq!(h.outcomes()[0].status, OutcomeStatus::Failed);

    // The resume marker never leaks into the terminal snapshot.
    let history = h.log.history(saga_id).await.unwrap();
    let failed = history.last().unwrap();
    assert!(!failed.data.contains_key("failed_from"));
    assert_eq!(context::get_str(&failed.data, "customer_id"), Some("CUST-1"));
}

#[tokio::test]
async fn redelivered_delivery_reply_after_completion_only_republishes_the_outcome() {
    let h = Harness::new(None);
    h.start_saga().await;

    let saga_id = h.saga_id();
    let events_before = h.log.event_count().await;

    let deliv_replies = h.bus.published(&h.topics.deliv_reply);
    h.bus
        .publish(
            &h.topics.deliv_reply,
            &saga_id.to_string(),
            deliv_replies[0].1.clone(),
        )
        .await
        .unwrap();
    h.bus.deliver_pending().await;

    // Terminal uniqueness: no further events after COMPLETED.
    assert_eq!(h.log.event_count().await, events_before);
    // But the outcome is announced again in case the first publish
    // was lost in the crash window.
    assert_eq!(h.outcomes().len(), 2);
    assert!(h.outcomes().iter().all(|o| o.status == OutcomeStatus::Completed));
}

#[tokio::test]
async fn failure_reply_after_failure_is_a_noop() {
    let h = Harness::new(Some(CommandType::ReserveStock));
    h.start_saga().await;

    let saga_id = h.saga_id();
    let events_before = h.log.event_count().await;
    let outcomes_before = h.outcomes().len();

    // A second failure reply for the same saga (the tie-break case).
    let stock_replies = h.bus.published(&h.topics.stock_reply);
    h.bus
        .publish(
            &h.topics.stock_reply,
            &saga_id.to_string(),
            stock_replies[0].1.clone(),
        )
        .await
        .unwrap();
    h.bus.deliver_pending().await;

    assert_eq!(h.log.event_count().await, events_before);
    assert_eq!(h.outcomes().len(), outcomes_before);
}

#[tokio::test]
async fn ingress_without_order_id_gets_one_generated() {
    let h = Harness::new(None);
    h.start_saga().await;

    let validate = Command::from_bytes(&h.bus.published(&h.topics.orders_commands)[0].1).unwrap();
    assert!(!validate.order_id.as_str().is_empty());
    assert_eq!(
        context::get_str(&validate.payload, "order_id"),
        Some(validate.order_id.as_str())
    );

    // And a supplied order id is kept.
    let payload = serde_json::to_vec(&json!({
        "order_id": "ORD-42",
        "customer_id": "CUST-2",
        "product_id": "P-2",
        "quantity": 1,
        "total_amount": 10.0,
        "address": "A2"
    }))
    .unwrap();
    h.bus
        .publish(&h.topics.ingress, "ingress", Bytes::from(payload))
        .await
        .unwrap();
    h.bus.deliver_pending().await;

    let commands = h.bus.published(&h.topics.orders_commands);
    let second = Command::from_bytes(&commands.last().unwrap().1).unwrap();
    assert_eq!(second.order_id, OrderId::new("ORD-42"));
}
