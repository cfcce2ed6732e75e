//! Loosely-typed argument bags passed across the invocation boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A single argument value. Mirrors the JSON data model without exposing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ArgumentValue>),
    Map(BTreeMap<String, ArgumentValue>),
}

/// Parameter name to value. Keys need not cover every declared parameter.
pub type Arguments = BTreeMap<String, ArgumentValue>;

impl ArgumentValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgumentValue::Null => "null",
            ArgumentValue::Bool(_) => "boolean",
            ArgumentValue::Integer(_) => "integer",
            ArgumentValue::Float(_) => "number",
            ArgumentValue::String(_) => "string",
            ArgumentValue::List(_) => "array",
            ArgumentValue::Map(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgumentValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgumentValue::Integer(value) => Some(*value),
            ArgumentValue::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            ArgumentValue::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgumentValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgumentValue::Null)
    }

    /// False when a NaN or infinite float appears anywhere inside the value.
    pub fn is_finite(&self) -> bool {
        match self {
            ArgumentValue::Float(value) => value.is_finite(),
            ArgumentValue::List(items) => items.iter().all(Self::is_finite),
            ArgumentValue::Map(entries) => entries.values().all(Self::is_finite),
            _ => true,
        }
    }

    /// JSON has no NaN or infinity; such floats become `null`.
    /// [`crate::mcp::capability::validate_arguments`] rejects them before a call.
    pub fn to_json(&self) -> Value {
        match self {
            ArgumentValue::Null => Value::Null,
            ArgumentValue::Bool(value) => Value::Bool(*value),
            ArgumentValue::Integer(value) => Value::Number((*value).into()),
            ArgumentValue::Float(value) => match Number::from_f64(*value) {
                Some(number) => Value::Number(number),
                None => {
                    debug!(value = %value, "Non-finite float has no JSON form; sending null");
                    Value::Null
                }
            },
            ArgumentValue::String(value) => Value::String(value.clone()),
            ArgumentValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ArgumentValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ArgumentValue::Null,
            Value::Bool(value) => ArgumentValue::Bool(*value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => ArgumentValue::Integer(value),
                None => ArgumentValue::Float(number.as_f64().unwrap_or_default()),
            },
            Value::String(value) => ArgumentValue::String(value.clone()),
            Value::Array(items) => ArgumentValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => ArgumentValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// MCP prompt arguments are strings; strings pass through, the rest is compact JSON.
    pub fn render_as_prompt_arg(&self) -> String {
        match self {
            ArgumentValue::String(value) => value.clone(),
            other => other.to_json().to_string(),
        }
    }

    /// Parses a CLI-style `value` literal: JSON when it parses, otherwise a plain string.
    pub fn parse_literal(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_json(&value),
            Err(_) => ArgumentValue::String(raw.to_string()),
        }
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_as_prompt_arg())
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        ArgumentValue::String(value.to_string())
    }
}

impl From<String> for ArgumentValue {
    fn from(value: String) -> Self {
        ArgumentValue::String(value)
    }
}

impl From<i64> for ArgumentValue {
    fn from(value: i64) -> Self {
        ArgumentValue::Integer(value)
    }
}

impl From<f64> for ArgumentValue {
    fn from(value: f64) -> Self {
        ArgumentValue::Float(value)
    }
}

impl From<bool> for ArgumentValue {
    fn from(value: bool) -> Self {
        ArgumentValue::Bool(value)
    }
}

pub fn arguments_to_json(arguments: &Arguments) -> Map<String, Value> {
    arguments
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

pub fn arguments_from_json(value: Option<&Value>) -> Arguments {
    match value {
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, value)| (key.clone(), ArgumentValue::from_json(value)))
            .collect(),
        _ => Arguments::new(),
    }
}

/// Builds an [`Arguments`] map from `key => value` pairs.
#[macro_export]
macro_rules! args {
    () => { $crate::mcp::value::Arguments::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut arguments = $crate::mcp::value::Arguments::new();
        $(arguments.insert($key.to_string(), $crate::mcp::value::ArgumentValue::from($value));)+
        arguments
    }};
}
