//! # Field Mapper (C2)
//!
//! Extracts a value from a nested response document via a small path
//! expression language (`customer.orders[0].total`,
//! `data.items[active=true].name`) and coerces extracted values to a
//! field's declared type.

use crate::value::{DataType, Value};

/// One segment of a parsed mapper expression.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Filter { key: String, literal: String },
}

/// Parse a dot-separated path expression into its segments. Hand-written
/// recursive descent over the raw characters — the grammar is small enough
/// that a PEG grammar would be overkill (reserved for the calculator
/// expression language instead, see [`crate::calculator::expr_eval`]).
fn parse_expression(expr: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut chars = expr.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, segments: &mut Vec<Segment>| {
        if !current.is_empty() {
            segments.push(Segment::Key(std::mem::take(current)));
        }
    };

    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                flush(&mut current, &mut segments);
            }
            '[' => {
                chars.next();
                flush(&mut current, &mut segments);
                let mut bracket = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    bracket.push(inner);
                }
                segments.push(parse_bracket(&bracket)?);
            }
            _ => {
                current.push(c);
                chars.next();
            }
        }
    }
    flush(&mut current, &mut segments);

    if segments.is_empty() {
        return Err(format!("empty mapper expression '{expr}'"));
    }
    Ok(segments)
}

fn parse_bracket(raw: &str) -> Result<Segment, String> {
    if let Some((key, literal)) = raw.split_once('=') {
        return Ok(Segment::Filter { key: key.trim().to_string(), literal: literal.trim().to_string() });
    }
    raw.trim()
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid bracket expression '[{raw}]'"))
}

/// §4.2: navigate `response` along `expression`. Any intermediate null, a
/// missing key, or an out-of-bounds index collapses the whole path to
/// `Value::Null` — this is not an error. A type mismatch during navigation
/// (e.g. indexing a scalar) is a [`FieldMappingFailure`]-worthy error,
/// returned as `Err` with the failing sub-path.
pub fn extract(response: &Value, expression: &str) -> Result<Value, (String, String)> {
    let segments = parse_expression(expression).map_err(|e| (expression.to_string(), e))?;
    let mut current = response.clone();
    let mut visited = String::new();

    for segment in &segments {
        if current.is_null() {
            return Ok(Value::Null);
        }
        visited = describe(&visited, segment);
        current = match (segment, &current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key).cloned().unwrap_or(Value::Null),
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx).cloned().unwrap_or(Value::Null),
            (Segment::Filter { key, literal }, Value::Array(items)) => items
                .iter()
                .find(|item| {
                    item.as_object()
                        .and_then(|obj| obj.get(key))
                        .map(|v| &v.canonical_string() == literal)
                        .unwrap_or(false)
                })
                .cloned()
                .unwrap_or(Value::Null),
            (segment, other) => {
                return Err((
                    visited.clone(),
                    format!("cannot apply segment {segment:?} to {other:?}"),
                ));
            }
        };
    }
    Ok(current)
}

fn describe(prefix: &str, segment: &Segment) -> String {
    match segment {
        Segment::Key(key) => {
            if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            }
        }
        Segment::Index(idx) => format!("{prefix}[{idx}]"),
        Segment::Filter { key, literal } => format!("{prefix}[{key}={literal}]"),
    }
}

/// §4.2 `convert_type`: thin wrapper delegating to [`Value::convert_type`],
/// kept here so callers don't need to reach into the value module directly.
pub fn convert_type(value: &Value, target: DataType) -> Result<Value, String> {
    value.convert_type(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn extracts_nested_key_path() {
        let doc = obj(&[("data", obj(&[("customer", obj(&[("creditScore", Value::from(720i64))]))]))]);
        let result = extract(&doc, "data.customer.creditScore").unwrap();
        assert_eq!(result, Value::from(720i64));
    }

    #[test]
    fn extracts_array_index() {
        let doc = obj(&[("orders", Value::Array(vec![obj(&[("total", Value::from(10i64))])]))]);
        let result = extract(&doc, "orders[0].total").unwrap();
        assert_eq!(result, Value::from(10i64));
    }

    #[test]
    fn filter_predicate_selects_first_match() {
        let doc = obj(&[(
            "items",
            Value::Array(vec![
                obj(&[("active", Value::from(false)), ("name", Value::from("a"))]),
                obj(&[("active", Value::from(true)), ("name", Value::from("b"))]),
            ]),
        )]);
        let result = extract(&doc, "items[active=true].name").unwrap();
        assert_eq!(result, Value::from("b"));
    }

    #[test]
    fn null_intermediate_collapses_to_null() {
        let doc = obj(&[("data", Value::Null)]);
        let result = extract(&doc, "data.customer.creditScore").unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn missing_key_is_null_not_error() {
        let doc = obj(&[("data", obj(&[]))]);
        let result = extract(&doc, "data.missing").unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn out_of_bounds_index_is_null() {
        let doc = obj(&[("items", Value::Array(vec![]))]);
        let result = extract(&doc, "items[5]").unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn indexing_a_scalar_is_a_mapping_failure() {
        let doc = obj(&[("name", Value::from("x"))]);
        let err = extract(&doc, "name[0]").unwrap_err();
        assert_eq!(err.0, "name[0]");
    }

    #[test]
    fn convert_type_number_to_string() {
        let v = Value::from(42i64);
        assert_eq!(convert_type(&v, DataType::String).unwrap(), Value::from("42"));
    }
}
