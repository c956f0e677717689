//! # Expression / Calculator Runtime (C3)
//!
//! Three dispatch modes over a read-only snapshot of dependency values:
//! an arithmetic/logical `EXPRESSION`, a named `BUILTIN` from the registry
//! in [`builtins`], or a `CUSTOM` computation resolved through an injected
//! [`CustomCalculatorLoader`].

pub mod builtins;
pub mod expr_eval;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field::FieldName;
use crate::value::{DataType, Value};

/// A calculator that the [`CustomCalculatorLoader`] hands back by name.
pub trait CustomCalculator: Send + Sync {
    /// Evaluate against the current binding snapshot. Implementations are
    /// required by contract to be reentrant (§5) — the core applies no
    /// additional synchronization.
    fn call(&self, bindings: &BTreeMap<FieldName, Value>) -> Result<Value, String>;
}

/// External collaborator resolving `CUSTOM` calculator identifiers to
/// callables. Existence is validated at configuration time, not at
/// execution time, so a dangling identifier fails fast.
pub trait CustomCalculatorLoader: Send + Sync {
    fn load(&self, identifier: &str) -> Option<std::sync::Arc<dyn CustomCalculator>>;
}

/// How a calculated field's value is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CalculatorConfig {
    Expression {
        expression: String,
    },
    Builtin {
        function: String,
        #[serde(default)]
        params: Vec<FieldName>,
    },
    Custom {
        identifier: String,
    },
}

/// Evaluate a field's calculator against the current snapshot of dependency
/// values, coercing the result to the field's declared type.
pub fn calculate(
    config: &CalculatorConfig,
    field: &FieldName,
    target_type: DataType,
    bindings: &BTreeMap<FieldName, Value>,
    custom_loader: Option<&dyn CustomCalculatorLoader>,
) -> Result<Value, String> {
    let raw = match config {
        CalculatorConfig::Expression { expression } => expr_eval::evaluate(expression, bindings)?,
        CalculatorConfig::Builtin { function, params } => {
            let args: Vec<Value> = params
                .iter()
                .map(|p| bindings.get(p).cloned().unwrap_or(Value::Null))
                .collect();
            builtins::invoke(function, &args)?
        }
        CalculatorConfig::Custom { identifier } => {
            let loader = custom_loader
                .ok_or_else(|| format!("no custom calculator loader configured for '{identifier}'"))?;
            let calc = loader
                .load(identifier)
                .ok_or_else(|| format!("custom calculator '{identifier}' is not registered"))?;
            calc.call(bindings)?
        }
    };
    raw.convert_type(target_type)
        .map_err(|reason| format!("field '{field}': {reason}"))
}

/// Configuration-time check that a `CUSTOM` calculator identifier resolves.
pub fn validate_custom_exists(
    identifier: &str,
    custom_loader: &dyn CustomCalculatorLoader,
) -> Result<(), String> {
    if custom_loader.load(identifier).is_some() {
        Ok(())
    } else {
        Err(format!("custom calculator '{identifier}' is not registered"))
    }
}
