//! # Rule Evaluator (C5)
//!
//! Recursive, short-circuiting evaluation of a [`Rule`] tree against a
//! snapshot of field values. Stateless and safe for concurrent invocation
//! (§5 reentrancy) — `evaluate` takes everything it needs by reference and
//! never raises (§7: unexpected internal errors become a `false` outcome).

use std::collections::HashMap;

use crate::comparator;
use crate::field::FieldName;
use crate::rule::{Combinator, Rule, RuleItem};
use crate::value::Value;

/// One visited node in a trace, recorded only when tracing is enabled.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Trace {
    /// e.g. `root.rules[2].rules[0]`.
    pub path: String,
    /// A short human-readable description, e.g. `age GT 18`.
    pub description: String,
    pub outcome: bool,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
}

/// Evaluate `rule` against `field_values`, ignoring traces. A null rule
/// evaluates to `false`.
pub fn evaluate(rule: Option<&Rule>, field_values: &HashMap<FieldName, Value>) -> bool {
    let mut sink = None;
    eval_rule(rule, field_values, "root", &mut sink)
}

/// Evaluate `rule`, recording a [`Trace`] entry for every node visited.
pub fn evaluate_with_trace(
    rule: Option<&Rule>,
    field_values: &HashMap<FieldName, Value>,
) -> (bool, Vec<Trace>) {
    let mut traces = Some(Vec::new());
    let outcome = eval_rule(rule, field_values, "root", &mut traces);
    (outcome, traces.unwrap_or_default())
}

fn eval_rule(
    rule: Option<&Rule>,
    field_values: &HashMap<FieldName, Value>,
    path: &str,
    traces: &mut Option<Vec<Trace>>,
) -> bool {
    let Some(rule) = rule else { return false };

    if rule.items.is_empty() {
        let outcome = !rule.not; // empty items ⇒ true, then apply `not`
        return outcome;
    }

    let result = match rule.combinator {
        Combinator::And => eval_and(rule, field_values, path, traces),
        Combinator::Or => eval_or(rule, field_values, path, traces),
    };

    if rule.not {
        !result
    } else {
        result
    }
}

fn eval_and(
    rule: &Rule,
    field_values: &HashMap<FieldName, Value>,
    path: &str,
    traces: &mut Option<Vec<Trace>>,
) -> bool {
    for (i, item) in rule.items.iter().enumerate() {
        let item_path = format!("{path}.rules[{i}]");
        if !eval_item(item, field_values, &item_path, traces) {
            return false; // short-circuit: later items are not visited
        }
    }
    true
}

fn eval_or(
    rule: &Rule,
    field_values: &HashMap<FieldName, Value>,
    path: &str,
    traces: &mut Option<Vec<Trace>>,
) -> bool {
    for (i, item) in rule.items.iter().enumerate() {
        let item_path = format!("{path}.rules[{i}]");
        if eval_item(item, field_values, &item_path, traces) {
            return true; // short-circuit: later items are not visited
        }
    }
    false
}

fn eval_item(
    item: &RuleItem,
    field_values: &HashMap<FieldName, Value>,
    path: &str,
    traces: &mut Option<Vec<Trace>>,
) -> bool {
    match item {
        RuleItem::Condition(cond) => {
            let actual = field_values.get(&cond.field).cloned().unwrap_or(Value::Null);
            let outcome = comparator::compare(&actual, cond.operator, &cond.value);
            let outcome = if cond.not { !outcome } else { outcome };
            if let Some(traces) = traces {
                traces.push(Trace {
                    path: path.to_string(),
                    description: format!("{} {} {}", cond.field, cond.operator, cond.value),
                    outcome,
                    actual: Some(actual),
                    expected: Some(cond.value.clone()),
                });
            }
            outcome
        }
        RuleItem::Group(group) => eval_rule(Some(group), field_values, path, traces),
    }
}
