//! `BUILTIN` calculator dispatch mode: a fixed registry of named functions,
//! each with a declared arity, used both by `CalculatorConfig::Builtin` and
//! by function calls inside `EXPRESSION` mode.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::value::Value;

/// Minimum/maximum argument count for a builtin. `None` for the max means
/// unbounded (variadic).
struct Arity {
    min: usize,
    max: Option<usize>,
}

fn arity_of(name: &str) -> Option<Arity> {
    Some(match name {
        "sum" | "avg" | "min" | "max" | "count" | "concat" | "coalesce" => {
            Arity { min: 1, max: None }
        }
        "dateAdd" => Arity { min: 2, max: Some(2) },
        "dateDiff" => Arity { min: 2, max: Some(2) },
        "upper" | "lower" => Arity { min: 1, max: Some(1) },
        _ => return None,
    })
}

/// §4.3: parameter/arity validation, run before a builtin is invoked.
pub fn validate_parameters(name: &str, args: &[Value]) -> Result<(), String> {
    let arity = arity_of(name).ok_or_else(|| format!("unknown builtin function '{name}'"))?;
    if args.len() < arity.min || arity.max.is_some_and(|max| args.len() > max) {
        return Err(format!(
            "builtin '{name}' expects {}{} arguments, got {}",
            arity.min,
            arity.max.map(|m| format!("..{m}")).unwrap_or_else(|| "+".to_string()),
            args.len()
        ));
    }
    Ok(())
}

/// Invoke a registered builtin by name.
pub fn invoke(name: &str, args: &[Value]) -> Result<Value, String> {
    validate_parameters(name, args)?;
    match name {
        "sum" => Ok(Value::Number(decimals(args)?.iter().sum())),
        "avg" => {
            let nums = decimals(args)?;
            let total: Decimal = nums.iter().sum();
            Ok(Value::Number(total / Decimal::from(nums.len())))
        }
        "min" => decimals(args)?
            .into_iter()
            .min()
            .map(Value::Number)
            .ok_or_else(|| "min() requires at least one argument".to_string()),
        "max" => decimals(args)?
            .into_iter()
            .max()
            .map(Value::Number)
            .ok_or_else(|| "max() requires at least one argument".to_string()),
        "count" => Ok(Value::from(args.len() as i64)),
        "concat" => Ok(Value::String(args.iter().map(Value::canonical_string).collect::<String>())),
        "upper" => Ok(Value::String(args[0].canonical_string().to_uppercase())),
        "lower" => Ok(Value::String(args[0].canonical_string().to_lowercase())),
        "coalesce" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "dateAdd" => date_add(args),
        "dateDiff" => date_diff(args),
        other => Err(format!("unknown builtin function '{other}'")),
    }
}

fn decimals(args: &[Value]) -> Result<Vec<Decimal>, String> {
    args.iter()
        .map(|v| v.as_decimal().ok_or_else(|| format!("expected a number, got {v:?}")))
        .collect()
}

fn as_date(v: &Value) -> Result<NaiveDate, String> {
    match v {
        Value::Date(dt) => Ok(dt.naive_utc().date()),
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("expected a YYYY-MM-DD date, got '{s}'")),
        other => Err(format!("expected a date, got {other:?}")),
    }
}

fn date_add(args: &[Value]) -> Result<Value, String> {
    let base = as_date(&args[0])?;
    let days = args[1].as_decimal().ok_or("dateAdd: second argument must be a number of days")?;
    let days: i64 = days.try_into().map_err(|_| "dateAdd: day count out of range".to_string())?;
    let result = base + Duration::days(days);
    Ok(Value::String(result.format("%Y-%m-%d").to_string()))
}

fn date_diff(args: &[Value]) -> Result<Value, String> {
    let a = as_date(&args[0])?;
    let b = as_date(&args[1])?;
    Ok(Value::from((a - b).num_days()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_avg_min_max() {
        let args = vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)];
        assert_eq!(invoke("sum", &args).unwrap(), Value::from(6i64));
        assert_eq!(invoke("min", &args).unwrap(), Value::from(1i64));
        assert_eq!(invoke("max", &args).unwrap(), Value::from(3i64));
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let args = vec![Value::Null, Value::Null, Value::from(5i64)];
        assert_eq!(invoke("coalesce", &args).unwrap(), Value::from(5i64));
    }

    #[test]
    fn date_diff_counts_days() {
        let args = vec![Value::from("2024-01-10"), Value::from("2024-01-01")];
        assert_eq!(invoke("dateDiff", &args).unwrap(), Value::from(9i64));
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(invoke("nope", &[]).is_err());
    }

    #[test]
    fn wrong_arity_is_an_error() {
        assert!(invoke("upper", &[]).is_err());
    }
}
