//! Topic name table.
//!
//! All saga-scoped topics are keyed by saga id, so every message for
//! one saga lands on the same partition and is consumed in order.

/// The full set of topics the system exchanges messages on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub ingress: String,
    pub outcome: String,
    pub orders_commands: String,
    pub orders_reply: String,
    pub stock_commands: String,
    pub stock_reply: String,
    pub pay_commands: String,
    pub pay_reply: String,
    pub deliv_commands: String,
    pub deliv_reply: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            ingress: "order-saga-ingress".into(),
            outcome: "order-saga-processed".into(),
            orders_commands: "orders-commands".into(),
            orders_reply: "orders-reply".into(),
            stock_commands: "stock-commands".into(),
            stock_reply: "stock-reply".into(),
            pay_commands: "pay-commands".into(),
            pay_reply: "pay-reply".into(),
            deliv_commands: "deliv-commands".into(),
            deliv_reply: "deliv-reply".into(),
        }
    }
}

impl Topics {
    /// Loads topic names from `TOPIC_*` environment variables,
    /// falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ingress: env_or("TOPIC_INGRESS", defaults.ingress),
            outcome: env_or("TOPIC_OUTCOME", defaults.outcome),
            orders_commands: env_or("TOPIC_ORDERS_COMMANDS", defaults.orders_commands),
            orders_reply: env_or("TOPIC_ORDERS_REPLY", defaults.orders_reply),
            stock_commands: env_or("TOPIC_STOCK_COMMANDS", defaults.stock_commands),
            stock_reply: env_or("TOPIC_STOCK_REPLY", defaults.stock_reply),
            pay_commands: env_or("TOPIC_PAY_COMMANDS", defaults.pay_commands),
            pay_reply: env_or("TOPIC_PAY_REPLY", defaults.pay_reply),
            deliv_commands: env_or("TOPIC_DELIV_COMMANDS", defaults.deliv_commands),
            deliv_reply: env_or("TOPIC_DELIV_REPLY", defaults.deliv_reply),
        }
    }

    /// The topics the orchestrator consumes: ingress plus every
    /// participant reply topic.
    pub fn orchestrator_topics(&self) -> Vec<String> {
        vec![
            self.ingress.clone(),
            self.orders_reply.clone(),
            self.stock_reply.clone(),
            self.pay_reply.clone(),
            self.deliv_reply.clone(),
        ]
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}
