//! Type coercion between declared parameter types

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Declared parameter type
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    List,
    Bytes,
    Map,
    /// Undeclared or unknown type: values pass through untouched
    #[default]
    Any,
}

impl From<&str> for ParamType {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "string" | "str" => ParamType::String,
            "int" | "integer" => ParamType::Int,
            "float" | "double" => ParamType::Float,
            "bool" | "boolean" => ParamType::Bool,
            "list" | "array" => ParamType::List,
            "bytes" => ParamType::Bytes,
            "dict" | "map" | "json" | "object" => ParamType::Map,
            _ => ParamType::Any,
        }
    }
}

impl From<String> for ParamType {
    fn from(name: String) -> Self {
        ParamType::from(name.as_str())
    }
}

impl From<ParamType> for String {
    fn from(t: ParamType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Bytes => "bytes",
            ParamType::Map => "map",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Convert `value`, declared as `source_type`, to `target_type`.
///
/// A string declared as a map/json source is parsed as JSON first; every
/// other source type only informs the conversion through the value itself.
pub fn coerce(value: &Value, source_type: &ParamType, target_type: &ParamType) -> Result<Value, String> {
    let parsed;
    let value = match (source_type, value) {
        (ParamType::Map, Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| format!("source declared as json but is not valid JSON: {}", e))?;
            &parsed
        }
        _ => value,
    };

    match target_type {
        ParamType::String => Ok(Value::String(to_string(value))),
        ParamType::Int => to_i64(value).map(|n| Value::Number(n.into())),
        ParamType::Float => to_f64(value).and_then(float_value),
        ParamType::Bool => to_bool(value).map(Value::Bool),
        ParamType::List => Ok(to_list(value)),
        ParamType::Bytes => Ok(to_bytes(value)),
        ParamType::Map | ParamType::Any => Ok(value.clone()),
    }
}

/// Stringify a value; strings are returned without quotes
pub fn to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "".to_string(),
        other => other.to_string(),
    }
}

/// Numeric coercion to an integer; floats are truncated
pub fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                truncate(f)
            } else {
                Err(format!("{} is out of range for int", n))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(i)
            } else {
                trimmed
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not numeric", s))
                    .and_then(truncate)
            }
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("cannot convert {} to int", type_name(other))),
    }
}

/// Numeric coercion to a float
pub fn to_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} is not representable as float", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not numeric", s)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(format!("cannot convert {} to float", type_name(other))),
    }
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        Value::Null => Ok(false),
        other => Err(format!("cannot convert {} to bool", type_name(other))),
    }
}

fn to_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        // objects stand in for sets: keep their members in key order
        Value::Object(map) => Value::Array(map.values().cloned().collect()),
        scalar => Value::Array(vec![scalar.clone()]),
    }
}

fn to_bytes(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::Array(s.bytes().map(|b| Value::Number(b.into())).collect()),
        other => other.clone(),
    }
}

fn truncate(f: f64) -> Result<i64, String> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(f.trunc() as i64)
    } else {
        Err(format!("{} is out of range for int", f))
    }
}

fn float_value(f: f64) -> Result<Value, String> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("{} is not a finite float", f))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
