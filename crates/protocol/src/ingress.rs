//! Ingress payload parsing and validation.

use common::OrderId;
use serde_json::Value;

use crate::context::{self, Context};
use crate::error::ProtocolError;

/// A validated ingress payload, ready to seed a saga.
///
/// The context always carries an `order_id` key after parsing, either
/// the one supplied or a generated one.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub context: Context,
}

/// Parses and validates an order payload from the ingress topic.
///
/// Required keys: `customer_id`, `product_id`, `address` (non-empty
/// strings), `quantity` (positive integer) and `total_amount`
/// (positive number). Unknown keys are carried through untouched.
pub fn parse_order_request(bytes: &[u8]) -> Result<OrderRequest, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut payload) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    require_str(&payload, "customer_id")?;
    require_str(&payload, "product_id")?;
    require_str(&payload, "address")?;

    match payload.get("quantity") {
        None => return Err(ProtocolError::MissingField("quantity")),
        Some(v) if v.as_u64().is_none_or(|q| q == 0) => {
            return Err(ProtocolError::InvalidField("quantity"));
        }
        Some(_) => {}
    }
    match payload.get("total_amount") {
        None => return Err(ProtocolError::MissingField("total_amount")),
        Some(v) if v.as_f64().is_none_or(|a| a <= 0.0) => {
            return Err(ProtocolError::InvalidField("total_amount"));
        }
        Some(_) => {}
    }

    let order_id = match payload.get("order_id") {
        Some(Value::String(id)) if !id.is_empty() => OrderId::new(id.clone()),
        Some(_) => return Err(ProtocolError::InvalidField("order_id")),
        None => OrderId::generate(),
    };
    payload.insert("order_id".into(), Value::String(order_id.to_string()));

    Ok(OrderRequest {
        order_id,
        context: payload,
    })
}

fn require_str(payload: &Context, field: &'static str) -> Result<(), ProtocolError> {
    match context::get_str(payload, field) {
        Some(s) if !s.is_empty() => Ok(()),
        Some(_) => Err(ProtocolError::InvalidField(field)),
        None if payload.contains_key(field) => Err(ProtocolError::InvalidField(field)),
        None => Err(ProtocolError::MissingField(field)),
    }
}
