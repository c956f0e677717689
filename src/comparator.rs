//! # Value Comparator (C1)
//!
//! Type-coercing comparison for the closed operator set. `compare` never
//! raises: casts and parses that fail degrade to `false`, logged at `warn`
//! via `tracing` rather than propagated, matching §4.1/§7's swallow policy.

use tracing::warn;

use crate::operator::OperatorCode;
use crate::value::Value;

/// Compare `actual` to `expected` under `operator`. Infallible by design.
pub fn compare(actual: &Value, operator: OperatorCode, expected: &Value) -> bool {
    match operator {
        OperatorCode::Eq => values_equal(actual, expected),
        OperatorCode::Ne => !values_equal(actual, expected),
        OperatorCode::Lt => ordered(actual, expected).is_some_and(|o| o.is_lt()),
        OperatorCode::Le => ordered(actual, expected).is_some_and(|o| o.is_le()),
        OperatorCode::Gt => ordered(actual, expected).is_some_and(|o| o.is_gt()),
        OperatorCode::Ge => ordered(actual, expected).is_some_and(|o| o.is_ge()),
        OperatorCode::Contains => substring(actual, expected, |h, n| h.contains(n)),
        OperatorCode::StartsWith => substring(actual, expected, |h, n| h.starts_with(n)),
        OperatorCode::EndsWith => substring(actual, expected, |h, n| h.ends_with(n)),
        OperatorCode::In => membership(actual, expected),
        OperatorCode::NotIn => !membership(actual, expected),
        OperatorCode::IsEmpty => actual.is_empty(),
        OperatorCode::IsNotEmpty => !actual.is_empty(),
    }
}

/// §4.1 EQ: null-aware, structural equality first, canonical string form
/// as a fallback (so `Value::Number(18)` equals `Value::String("18")`).
fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() && b.is_null() {
        return true;
    }
    if a == b {
        return true;
    }
    a.canonical_string() == b.canonical_string()
}

fn ordered(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a.as_decimal(), b.as_decimal()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => {
            warn!(actual = ?a, expected = ?b, "comparator: non-numeric operand in ordered comparison");
            None
        }
    }
}

fn substring(a: &Value, b: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    let haystack = a.canonical_string().to_lowercase();
    let needle = b.canonical_string().to_lowercase();
    test(&haystack, &needle)
}

/// §4.1 IN/NOT_IN: `expected` must be a sequence; membership via the EQ rule.
fn membership(actual: &Value, expected: &Value) -> bool {
    match expected.as_array() {
        Some(items) => items.iter().any(|item| values_equal(actual, item)),
        None => {
            warn!(expected = ?expected, "comparator: IN/NOT_IN expected an array operand");
            false
        }
    }
}
