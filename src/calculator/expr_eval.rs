//! Parser and evaluator for the `EXPRESSION` calculator dispatch mode.
//!
//! Follows the same "derive a `pest` parser from a `.pest` grammar file,
//! then walk the pair tree" shape the rest of this codebase uses for its
//! own mini-languages.

use std::collections::BTreeMap;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rust_decimal::Decimal;

use crate::calculator::builtins;
use crate::field::FieldName;
use crate::value::Value;

#[derive(Parser)]
#[grammar = "calculator/expr.pest"]
struct ExprParser;

/// Evaluate `source` with free variables bound by `bindings`.
pub fn evaluate(source: &str, bindings: &BTreeMap<FieldName, Value>) -> Result<Value, String> {
    let mut pairs = ExprParser::parse(Rule::program, source)
        .map_err(|e| format!("expression parse error: {e}"))?;
    let program = pairs.next().ok_or("empty expression")?;
    let expr = program.into_inner().next().ok_or("empty expression")?;
    eval_pair(expr, bindings)
}

fn eval_pair(pair: Pair<Rule>, bindings: &BTreeMap<FieldName, Value>) -> Result<Value, String> {
    match pair.as_rule() {
        Rule::expr => eval_pair(first_inner(pair)?, bindings),
        Rule::or_expr => {
            let mut result = false;
            for operand in pair.into_inner() {
                result |= truthy(&eval_pair(operand, bindings)?);
            }
            Ok(Value::Bool(result))
        }
        Rule::and_expr => {
            let mut result = true;
            for operand in pair.into_inner() {
                result &= truthy(&eval_pair(operand, bindings)?);
            }
            Ok(Value::Bool(result))
        }
        Rule::cmp_expr => {
            let mut inner = pair.into_inner();
            let left = eval_pair(inner.next().ok_or("missing operand")?, bindings)?;
            match (inner.next(), inner.next()) {
                (Some(op), Some(right_pair)) => {
                    let right = eval_pair(right_pair, bindings)?;
                    Ok(Value::Bool(apply_cmp(op.as_str(), &left, &right)))
                }
                _ => Ok(left),
            }
        }
        Rule::add_expr => {
            let mut inner = pair.into_inner();
            let mut acc = as_decimal(&eval_pair(inner.next().ok_or("missing operand")?, bindings)?)?;
            let rest: Vec<_> = inner.collect();
            let mut i = 0;
            while i < rest.len() {
                let op = rest[i].as_str();
                let rhs = as_decimal(&eval_pair(rest[i + 1].clone(), bindings)?)?;
                acc = if op == "+" { acc + rhs } else { acc - rhs };
                i += 2;
            }
            Ok(Value::Number(acc))
        }
        Rule::mul_expr => {
            let mut inner = pair.into_inner();
            let mut acc = as_decimal(&eval_pair(inner.next().ok_or("missing operand")?, bindings)?)?;
            let rest: Vec<_> = inner.collect();
            let mut i = 0;
            while i < rest.len() {
                let op = rest[i].as_str();
                let rhs = as_decimal(&eval_pair(rest[i + 1].clone(), bindings)?)?;
                if op == "*" {
                    acc *= rhs;
                } else {
                    if rhs.is_zero() {
                        return Err("division by zero".to_string());
                    }
                    acc /= rhs;
                }
                i += 2;
            }
            Ok(Value::Number(acc))
        }
        Rule::unary_expr => {
            let mut inner = pair.into_inner();
            let first = inner.next().ok_or("missing operand")?;
            if first.as_rule() == Rule::unary_op {
                let op = first.as_str();
                let operand = eval_pair(inner.next().ok_or("missing operand")?, bindings)?;
                match op {
                    "-" => Ok(Value::Number(-as_decimal(&operand)?)),
                    "!" => Ok(Value::Bool(!truthy(&operand))),
                    other => Err(format!("unknown unary operator '{other}'")),
                }
            } else {
                eval_pair(first, bindings)
            }
        }
        Rule::primary => eval_pair(first_inner(pair)?, bindings),
        Rule::func_call => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or("missing function name")?.as_str();
            let mut args = Vec::new();
            for arg in inner {
                args.push(eval_pair(arg, bindings)?);
            }
            builtins::invoke(name, &args)
        }
        Rule::ident => {
            let name = pair.as_str();
            Ok(bindings.get(name).cloned().unwrap_or(Value::Null))
        }
        Rule::number => {
            let n: Decimal = pair.as_str().parse().map_err(|_| format!("bad number literal '{}'", pair.as_str()))?;
            Ok(Value::Number(n))
        }
        Rule::string => {
            let raw = pair.as_str();
            Ok(Value::String(raw[1..raw.len() - 1].to_string()))
        }
        Rule::boolean => Ok(Value::Bool(pair.as_str() == "true")),
        other => Err(format!("unexpected grammar node {other:?}")),
    }
}

fn first_inner(pair: Pair<Rule>) -> Result<Pair<Rule>, String> {
    pair.into_inner().next().ok_or_else(|| "malformed expression".to_string())
}

fn as_decimal(v: &Value) -> Result<Decimal, String> {
    v.as_decimal().ok_or_else(|| format!("expected a number, got {v:?}"))
}

fn truthy(v: &Value) -> bool {
    v.as_bool().unwrap_or(!v.is_empty())
}

fn apply_cmp(op: &str, left: &Value, right: &Value) -> bool {
    match op {
        "==" => crate::comparator::compare(left, crate::operator::OperatorCode::Eq, right),
        "!=" => crate::comparator::compare(left, crate::operator::OperatorCode::Ne, right),
        "<" => crate::comparator::compare(left, crate::operator::OperatorCode::Lt, right),
        "<=" => crate::comparator::compare(left, crate::operator::OperatorCode::Le, right),
        ">" => crate::comparator::compare(left, crate::operator::OperatorCode::Gt, right),
        ">=" => crate::comparator::compare(left, crate::operator::OperatorCode::Ge, right),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, Value)]) -> BTreeMap<FieldName, Value> {
        pairs
            .iter()
            .map(|(k, v)| (FieldName::new_unchecked(*k), v.clone()))
            .collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let b = bind(&[]);
        assert_eq!(evaluate("2 + 3 * 4", &b).unwrap(), Value::from(14i64));
    }

    #[test]
    fn parens_override_precedence() {
        let b = bind(&[]);
        assert_eq!(evaluate("(2 + 3) * 4", &b).unwrap(), Value::from(20i64));
    }

    #[test]
    fn variables_resolve_from_bindings() {
        let b = bind(&[("subtotal", Value::from(80.0)), ("taxRate", Value::from(0.10))]);
        let v = evaluate("subtotal * (1 + taxRate)", &b).unwrap();
        assert_eq!(v.as_decimal().unwrap().round_dp(2).to_string(), "88.00");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let b = bind(&[]);
        assert!(evaluate("1 / 0", &b).is_err());
    }

    #[test]
    fn logical_and_or() {
        let b = bind(&[]);
        assert_eq!(evaluate("true && false", &b).unwrap(), Value::Bool(false));
        assert_eq!(evaluate("true || false", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn comparison_yields_boolean() {
        let b = bind(&[("age", Value::from(25i64))]);
        assert_eq!(evaluate("age >= 18", &b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn function_call_dispatches_to_builtins() {
        let b = bind(&[("a", Value::from(3i64)), ("b", Value::from(4i64))]);
        assert_eq!(evaluate("max(a, b)", &b).unwrap(), Value::from(4i64));
    }

    #[test]
    fn unary_negation_and_not() {
        let b = bind(&[]);
        assert_eq!(evaluate("-5 + 2", &b).unwrap(), Value::from(-3i64));
        assert_eq!(evaluate("!false", &b).unwrap(), Value::Bool(true));
    }
}
