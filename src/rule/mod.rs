//! # Rule Model (§3 `Rule Definition`, `RuleItem`)
//!
//! A recursive tree of conditions and groups. See [`evaluator`] for the
//! walk that turns a tree plus a field-value snapshot into a boolean
//! outcome (C5).

pub mod evaluator;

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::field::FieldName;
use crate::operator::OperatorCode;
use crate::value::Value;

/// How a group's items combine. Unknown wire values are normalized to
/// `And` with a warning (§4.5) rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub fn parse(raw: &str) -> Combinator {
        match raw.to_ascii_uppercase().as_str() {
            "OR" => Combinator::Or,
            "AND" => Combinator::And,
            other => {
                tracing::warn!(combinator = other, "unknown combinator, treating as AND");
                Combinator::And
            }
        }
    }
}

impl<'de> Deserialize<'de> for Combinator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CombinatorVisitor;
        impl Visitor<'_> for CombinatorVisitor {
            type Value = Combinator;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a combinator string, \"AND\" or \"OR\"")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Combinator::parse(v))
            }
        }
        deserializer.deserialize_str(CombinatorVisitor)
    }
}

/// A leaf comparing `field` to `value` with `operator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldName,
    pub operator: OperatorCode,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub not: bool,
}

/// Either a leaf [`Condition`] or a nested [`Rule`] group. Distinguished on
/// the wire by shape: a condition carries `field`/`operator`, a group
/// carries `combinator`/`items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleItem {
    Condition(Condition),
    Group(Rule),
}

/// A boolean rule: a group of items combined by `combinator`, optionally
/// negated. An empty `items` list evaluates to `true` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub combinator: Combinator,
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub items: Vec<RuleItem>,
    /// Present on top-level rules loaded from a store; absent on inline
    /// groups nested inside `items`.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Rule {
    pub fn group(combinator: Combinator, items: Vec<RuleItem>) -> Self {
        Rule { combinator, not: false, items, id: None, name: None }
    }

    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }

    /// Walk the tree and collect every field name referenced by a
    /// condition, used by the orchestrator (C8) to drive field resolution.
    pub fn referenced_fields(&self) -> HashSet<FieldName> {
        let mut fields = HashSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut HashSet<FieldName>) {
        for item in &self.items {
            match item {
                RuleItem::Condition(cond) => {
                    out.insert(cond.field.clone());
                }
                RuleItem::Group(group) => group.collect_fields(out),
            }
        }
    }

    /// §4.8 structural validation, independent of any particular field's
    /// declared type (operator/type compatibility is checked by the
    /// orchestrator once field configs are available).
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Ok(());
        }
        for item in &self.items {
            match item {
                RuleItem::Condition(cond) => {
                    if !cond.operator.is_value_less() && cond.value.is_null() {
                        return Err(format!(
                            "condition on field '{}' with operator {} requires a value",
                            cond.field, cond.operator
                        ));
                    }
                }
                RuleItem::Group(group) => group.validate_structure()?,
            }
        }
        Ok(())
    }
}
