//! Evaluation of single-predicate trigger filters against event payloads.

use std::cmp::Ordering;

use serde_json::Value;
use stepwise_types::workflow::{FilterExpr, FilterOp};

use super::template::descend;

/// Evaluate `filter` against an activation payload.
///
/// A missing path reads as `null`. Equality compares numbers by value
/// (`1 == 1.0`) and everything else structurally. Ordering operators apply
/// to number/number and string/string pairs only; any other pairing is
/// `false`.
pub fn evaluate(filter: &FilterExpr, payload: &Value) -> bool {
    let path: Vec<&str> = filter.path.iter().map(String::as_str).collect();
    let actual = descend(payload, &path).unwrap_or(&Value::Null);
    let expected = &filter.value;

    match filter.op {
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Ne => !values_equal(actual, expected),
        FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::Ge => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::Le => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(filter: &str, payload: Value) -> bool {
        let filter: FilterExpr = filter.parse().unwrap();
        evaluate(&filter, &payload)
    }

    #[test]
    fn equality_on_strings_and_numbers() {
        let payload = json!({ "status": "paid", "total": 100 });
        assert!(check("status == 'paid'", payload.clone()));
        assert!(!check("status == 'open'", payload.clone()));
        assert!(check("status != 'open'", payload.clone()));
        assert!(check("total == 100.0", payload));
    }

    #[test]
    fn ordering_on_numbers() {
        let payload = json!({ "order": { "total": 250.5 } });
        assert!(check("order.total > 100", payload.clone()));
        assert!(check("payload.order.total >= 250.5", payload.clone()));
        assert!(!check("order.total < 250.5", payload.clone()));
        assert!(check("order.total <= 300", payload));
    }

    #[test]
    fn ordering_on_strings_is_lexicographic() {
        let payload = json!({ "region": "eu-west" });
        assert!(check("region > 'eu'", payload.clone()));
        assert!(check("region < 'us'", payload));
    }

    #[test]
    fn missing_path_reads_as_null() {
        let payload = json!({ "a": 1 });
        assert!(check("deleted_at == null", payload.clone()));
        assert!(!check("missing.deep > 0", payload.clone()));
        assert!(check("missing != 'x'", payload));
    }

    #[test]
    fn mismatched_types_never_order() {
        let payload = json!({ "total": "100" });
        assert!(!check("total > 5", payload.clone()));
        assert!(!check("total <= 500", payload.clone()));
        assert!(!check("total == 100", payload));
    }

    #[test]
    fn array_index_paths() {
        let payload = json!({ "items": [{ "qty": 2 }, { "qty": 9 }] });
        assert!(check("items.1.qty > 5", payload.clone()));
        assert!(!check("items.0.qty > 5", payload));
    }

    #[test]
    fn whole_payload_comparison() {
        assert!(check("payload == 7", json!(7)));
        assert!(!check("payload == 7", json!({ "x": 7 })));
    }
}
