//! Coercion of string parameters against a tool's advertised input schema.
//!
//! Callers hand over every parameter as a string. Where the schema declares a
//! type for that parameter the string is converted; anything the schema does
//! not describe passes through unchanged.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Declared type of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
    Unknown,
}

impl ParamType {
    /// Read the type of a JSON schema node.
    ///
    /// A union such as `["integer", "null"]` takes its first non-null member.
    pub fn from_schema(schema: &Value) -> Self {
        let name = match schema.get("type") {
            Some(Value::String(name)) => name.as_str(),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|n| *n != "null")
                .unwrap_or(""),
            _ => "",
        };
        match name {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "array" => Self::Array(Box::new(
                schema.get("items").map_or(Self::Unknown, Self::from_schema),
            )),
            _ => Self::Unknown,
        }
    }
}

/// Parameter name → declared type, from an object schema's `properties`.
pub fn parameter_types(input_schema: &Value) -> HashMap<String, ParamType> {
    input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| (name.clone(), ParamType::from_schema(schema)))
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a raw string to the declared type, falling back to the string.
pub fn coerce(raw: &str, ty: &ParamType) -> Value {
    let coerced = match ty {
        ParamType::Boolean => parse_bool(raw),
        ParamType::Integer | ParamType::Number => parse_number(raw),
        ParamType::Array(item) => parse_array(raw).map(|items| coerce_items(items, item)),
        ParamType::String | ParamType::Unknown => None,
    };
    coerced.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Coerce a whole parameter map. Keys come out sorted.
pub fn coerce_arguments(
    params: HashMap<String, String>,
    input_schema: Option<&Value>,
) -> Map<String, Value> {
    let types = input_schema.map(parameter_types).unwrap_or_default();
    let mut entries: Vec<(String, String)> = params.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .map(|(name, raw)| {
            let value = match types.get(&name) {
                Some(ty) => coerce(&raw, ty),
                None => Value::String(raw),
            };
            (name, value)
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        Some(Value::Bool(true))
    } else if raw.eq_ignore_ascii_case("false") {
        Some(Value::Bool(false))
    } else {
        None
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::Number(n.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_array(raw: &str) -> Option<Vec<Value>> {
    let raw = raw.trim();
    if !(raw.starts_with('[') && raw.ends_with(']')) {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn coerce_items(items: Vec<Value>, item_type: &ParamType) -> Value {
    Value::Array(
        items
            .into_iter()
            .map(|item| coerce_element(item, item_type))
            .collect(),
    )
}

fn coerce_element(item: Value, ty: &ParamType) -> Value {
    match (item, ty) {
        (Value::String(s), ty) => coerce(&s, ty),
        (Value::Array(items), ParamType::Array(inner)) => coerce_items(items, inner),
        (other, _) => other,
    }
}
