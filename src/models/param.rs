//! Typed parameters.
//!
//! A Param gives a name a JSON-schema-like shape plus an optional
//! default. Profile values that name a known Param are validated
//! against its schema; the renderer falls back to the default when no
//! profile supplies a value.

use super::{prefix, Validation};
use crate::core::error::ModelError;
use crate::tracker::index::{self, Index, IndexValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declared parameter with a validation schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Param {
    #[serde(flatten)]
    pub validation: Validation,
    /// Parameter name, as looked up by templates.
    pub name: String,
    /// What the parameter means.
    pub description: String,
    /// JSON-schema-like constraint. Supported keywords: `type`,
    /// `enum`, `minimum`, `maximum`, `items`, `properties`,
    /// `required`, `default`.
    pub schema: Value,
}

impl Param {
    pub fn key(&self) -> String {
        self.name.clone()
    }

    /// The schema's declared default, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.schema.get("default")
    }

    /// Validate a candidate value against the schema.
    pub fn validate_value(&self, v: &Value) -> Result<(), String> {
        check_schema(&self.schema, v)
    }
}

pub static INDEXES: [Index; 1] = [Index {
    name: "Name",
    kind: "string",
    unique: true,
    key_of: |e| IndexValue::Str(e.key()),
    parse: index::parse_str,
}];

pub(crate) fn before_save(p: &mut Param) -> Result<(), ModelError> {
    let mut e = ModelError::validation(prefix::PARAMS, &p.name);
    if p.name.is_empty() {
        e.errorf("Param must have a name");
    }
    if !p.schema.is_null() && !p.schema.is_object() {
        e.errorf("Schema must be an object");
    }
    if !e.contains_error() {
        p.validation.finish(&e);
    }
    e.or_ok()
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Minimal schema checker over the keyword subset Params use.
fn check_schema(schema: &Value, v: &Value) -> Result<(), String> {
    let obj = match schema.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };
    if let Some(want) = obj.get("type").and_then(Value::as_str) {
        let got = type_name(v);
        let ok = match want {
            // Integers satisfy "number".
            "number" => matches!(got, "number" | "integer"),
            other => got == other,
        };
        if !ok {
            return Err(format!("expected {want}, got {got}"));
        }
    }
    if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(v) {
            return Err(format!("{v} is not one of the allowed values"));
        }
    }
    if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
        if let Some(n) = v.as_f64() {
            if n < min {
                return Err(format!("{n} is below the minimum {min}"));
            }
        }
    }
    if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
        if let Some(n) = v.as_f64() {
            if n > max {
                return Err(format!("{n} is above the maximum {max}"));
            }
        }
    }
    if let Some(items) = obj.get("items") {
        if let Some(arr) = v.as_array() {
            for (i, item) in arr.iter().enumerate() {
                check_schema(items, item).map_err(|e| format!("item {i}: {e}"))?;
            }
        }
    }
    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        if let Some(map) = v.as_object() {
            for (k, sub) in props {
                if let Some(field) = map.get(k) {
                    check_schema(sub, field).map_err(|e| format!("property {k}: {e}"))?;
                }
            }
        }
    }
    if let Some(required) = obj.get("required").and_then(Value::as_array) {
        if let Some(map) = v.as_object() {
            for k in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(k) {
                    return Err(format!("missing required property {k}"));
                }
            }
        }
    }
    Ok(())
}
