//! # Filter predicate semantics
//!
//! Per-field conjunction over `eq|ne|gt|gte|lt|lte|like|in|contains`
//! predicates. A field absent from the row fails the whole
//! predicate for that field regardless of operator. Equality-family
//! comparisons are string-coerced (JSON-encoded for non-strings, a
//! deliberate choice to keep filter semantics uniform across storage
//! backends); numeric comparisons require both sides to already be
//! JSON numbers.

use serde_json::Value;
use shared::store::Row;

use crate::domain::{FilterOp, SubscriptionFilter};

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// SQL-style `%` wildcard match. `%` matches any (possibly empty) run of
/// characters; every other character must match literally.
fn like_matches(haystack: &str, pattern: &str) -> bool {
    fn helper(h: &[u8], p: &[u8]) -> bool {
        match p.split_first() {
            None => h.is_empty(),
            Some((b'%', rest)) => {
                if rest.is_empty() {
                    return true;
                }
                (0..=h.len()).any(|i| helper(&h[i..], rest))
            }
            Some((c, rest)) => h.first().is_some_and(|hc| hc == c) && helper(&h[1..], rest),
        }
    }
    helper(haystack.as_bytes(), pattern.as_bytes())
}

fn op_matches(field_value: &Value, op: &FilterOp) -> bool {
    match op {
        FilterOp::Eq(expected) => coerce(field_value) == coerce(expected),
        FilterOp::Ne(expected) => coerce(field_value) != coerce(expected),
        FilterOp::Gt(expected) => matches!((as_f64(field_value), as_f64(expected)), (Some(a), Some(b)) if a > b),
        FilterOp::Gte(expected) => matches!((as_f64(field_value), as_f64(expected)), (Some(a), Some(b)) if a >= b),
        FilterOp::Lt(expected) => matches!((as_f64(field_value), as_f64(expected)), (Some(a), Some(b)) if a < b),
        FilterOp::Lte(expected) => matches!((as_f64(field_value), as_f64(expected)), (Some(a), Some(b)) if a <= b),
        FilterOp::Like(pattern) => {
            let Value::String(s) = field_value else { return false };
            like_matches(s, pattern)
        }
        FilterOp::In(candidates) => {
            let needle = coerce(field_value);
            candidates.iter().any(|c| coerce(c) == needle)
        }
        FilterOp::Contains(expected) => match field_value {
            Value::String(s) => match expected {
                Value::String(sub) => s.contains(sub.as_str()),
                other => s.contains(&coerce(other)),
            },
            Value::Array(items) => items.iter().any(|item| coerce(item) == coerce(expected)),
            _ => false,
        },
    }
}

/// Evaluates every field's operator list against `row`, returning
/// `true` only if all fields and all per-field operators hold.
pub fn matches_row(row: &Row, filter: &SubscriptionFilter) -> bool {
    filter.iter().all(|(field, ops)| match row.get(field) {
        None => false,
        Some(value) => ops.iter().all(|op| op_matches(value, op)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn missing_field_never_matches() {
        let filter: SubscriptionFilter = [("published".to_string(), vec![FilterOp::Eq(json!(true))])].into();
        assert!(!matches_row(&row(&[]), &filter));
    }

    #[test]
    fn eq_is_string_coerced() {
        let filter: SubscriptionFilter = [("count".to_string(), vec![FilterOp::Eq(json!(3))])].into();
        assert!(matches_row(&row(&[("count", json!(3))]), &filter));
        assert!(!matches_row(&row(&[("count", json!(4))]), &filter));
    }

    #[test]
    fn numeric_comparison_requires_both_sides_numeric() {
        let filter: SubscriptionFilter = [("count".to_string(), vec![FilterOp::Gt(json!(2))])].into();
        assert!(matches_row(&row(&[("count", json!(3))]), &filter));
        assert!(!matches_row(&row(&[("count", json!("not a number"))]), &filter));
    }

    #[test]
    fn multiple_operators_on_same_field_are_conjunctive() {
        let filter: SubscriptionFilter =
            [("count".to_string(), vec![FilterOp::Gte(json!(2)), FilterOp::Lte(json!(5))])].into();
        assert!(matches_row(&row(&[("count", json!(3))]), &filter));
        assert!(!matches_row(&row(&[("count", json!(9))]), &filter));
    }

    #[test]
    fn like_supports_percent_wildcard() {
        assert!(like_matches("hello world", "hello%"));
        assert!(like_matches("hello world", "%world"));
        assert!(like_matches("hello world", "%lo wo%"));
        assert!(!like_matches("hello world", "goodbye%"));
    }

    #[test]
    fn in_matches_any_candidate() {
        let filter: SubscriptionFilter =
            [("status".to_string(), vec![FilterOp::In(vec![json!("open"), json!("pending")])])].into();
        assert!(matches_row(&row(&[("status", json!("pending"))]), &filter));
        assert!(!matches_row(&row(&[("status", json!("closed"))]), &filter));
    }

    #[test]
    fn contains_checks_substring_or_array_membership() {
        let filter: SubscriptionFilter = [("title".to_string(), vec![FilterOp::Contains(json!("cat"))])].into();
        assert!(matches_row(&row(&[("title", json!("concatenate"))]), &filter));

        let filter: SubscriptionFilter = [("tags".to_string(), vec![FilterOp::Contains(json!("rust"))])].into();
        assert!(matches_row(&row(&[("tags", json!(["go", "rust"]))]), &filter));
        assert!(!matches_row(&row(&[("tags", json!(["go", "python"]))]), &filter));
    }
}
