//! # Dynamic Value Type
//!
//! A JSON-shaped dynamic value used everywhere a field value, a data-service
//! response fragment, or a rule literal flows through the engine: rule
//! condition operands, field values, parsed HTTP response bodies, and
//! calculator results all share this representation.
//!
//! Comparisons and arithmetic never trust the in-memory variant alone —
//! [`Value::as_decimal`] and [`Value::canonical_string`] perform the
//! coercions the specification requires (e.g. a numeric string compares
//! equal to the number it spells out).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The declared type of a field, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    String,
    Number,
    Date,
    Boolean,
    Array,
    Object,
}

/// A dynamic value: either a rule operand, a fetched/calculated field value,
/// or a fragment of a parsed data-service response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Decimal),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// §4.1 `IS_EMPTY`: null, an empty string after trim, or an empty
    /// sequence/array.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Canonical string form used for EQ/NE fallback and for
    /// CONTAINS/STARTS_WITH/ENDS_WITH.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(d) => d.normalize().to_string(),
            Value::String(s) => s.clone(),
            Value::Date(dt) => dt.to_rfc3339(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Attempt to coerce to a decimal: direct numbers, or strings that parse
    /// as a canonical number. Used by LT/LE/GT/GE and by arithmetic.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(d) => Some(*d),
            Value::String(s) => s.trim().parse::<Decimal>().ok(),
            Value::Bool(b) => Some(Decimal::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// §4.2 `convert_type`: deterministic coercion to a target field type.
    /// `Err` carries a human-readable reason for `FieldMappingFailure`.
    pub fn convert_type(&self, target: DataType) -> Result<Value, String> {
        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (_, DataType::String) => Ok(Value::String(self.canonical_string())),
            (_, DataType::Number) => self
                .as_decimal()
                .map(Value::Number)
                .ok_or_else(|| format!("cannot convert {self:?} to NUMBER")),
            (_, DataType::Boolean) => self
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("cannot convert {self:?} to BOOLEAN")),
            (Value::Date(_), DataType::Date) => Ok(self.clone()),
            (Value::String(s), DataType::Date) => parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| format!("cannot parse '{s}' as a date")),
            (Value::Array(_), DataType::Array) => Ok(self.clone()),
            (Value::Object(_), DataType::Object) => Ok(self.clone()),
            (other, target) => Err(format!("cannot convert {other:?} to {target:?}")),
        }
    }

    /// Convert a parsed JSON document (an HTTP response body, typically)
    /// into our dynamic `Value` tree.
    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => n
                .to_string()
                .parse::<Decimal>()
                .ok()
                .or_else(|| Decimal::try_from(n.as_f64().unwrap_or_default()).ok())
                .map(Value::Number)
                .unwrap_or(Value::Null),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Decimal::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Decimal::try_from(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Number(d)
    }
}

/// Structural equality, used as the first EQ attempt before falling back to
/// the canonical-string comparison (§4.1).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.as_decimal(), other.as_decimal()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
    }
    None
}
