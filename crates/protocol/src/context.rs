//! The saga context: a JSON object carried across every step.

use common::OrderId;
use serde_json::Value;

/// Accumulated saga payload, keyed by string.
///
/// Known keys (`order_id`, `customer_id`, `product_id`, `quantity`,
/// `total_amount`, `address`) are validated at the ingress boundary;
/// unknown keys pass through untouched so participants can enrich the
/// context for downstream steps.
pub type Context = serde_json::Map<String, Value>;

/// Merges `overlay` into `base`, last write winning per key.
pub fn merged(base: &Context, overlay: &Context) -> Context {
    let mut out = base.clone();
    for (key, value) in overlay {
        out.insert(key.clone(), value.clone());
    }
    out
}

/// Reads a string-valued key.
pub fn get_str<'a>(context: &'a Context, key: &str) -> Option<&'a str> {
    context.get(key).and_then(Value::as_str)
}

/// Reads an unsigned integer key (JSON numbers only).
pub fn get_u64(context: &Context, key: &str) -> Option<u64> {
    context.get(key).and_then(Value::as_u64)
}

/// Reads a floating-point key, accepting any JSON number.
pub fn get_f64(context: &Context, key: &str) -> Option<f64> {
    context.get(key).and_then(Value::as_f64)
}

/// Extracts the order id carried in the context.
pub fn order_id(context: &Context) -> Option<OrderId> {
    get_str(context, "order_id").map(OrderId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merged_is_last_write_wins() {
        let base = ctx(json!({"a": 1, "b": "keep"}));
        let overlay = ctx(json!({"a": 2, "c": true}));

        let out = merged(&base, &overlay);
        assert_eq!(out.get("a"), Some(&json!(2)));
        assert_eq!(out.get("b"), Some(&json!("keep")));
        assert_eq!(out.get("c"), Some(&json!(true)));
    }

    #[test]
    fn merged_with_empty_overlay_preserves_base() {
        let base = ctx(json!({"order_id": "ORD-1", "quantity": 2}));
        let out = merged(&base, &Context::new());
        assert_eq!(out, base);
    }

    #[test]
    fn typed_accessors() {
        let context = ctx(json!({
            "order_id": "ORD-1",
            "quantity": 2,
            "total_amount": 199.98
        }));

        assert_eq!(order_id(&context), Some(OrderId::new("ORD-1")));
        assert_eq!(get_u64(&context, "quantity"), Some(2));
        assert_eq!(get_f64(&context, "total_amount"), Some(199.98));
        assert_eq!(get_str(&context, "missing"), None);
        assert_eq!(get_u64(&context, "order_id"), None);
    }
}
