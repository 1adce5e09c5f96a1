pub mod chain_rpc;
pub mod http_provider;
pub mod market_data;
pub mod safety;

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;

/// Declared shape of one tool a [`ToolProvider`] exposes, as reported by
/// the provider's own introspection call. `input_schema` is the tool's
/// JSON Schema (an object with `properties` and `required`).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn properties(&self) -> Vec<(String, Value)> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn required(&self) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| {
                req.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Uniform surface every external tool-serving collaborator exposes:
/// a list of declared tools plus a single untyped `call`. Every external
/// I/O through a provider is a suspension point.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    fn list_tools(&self) -> &[ToolDescriptor];

    async fn call(&self, method: &str, args: Value) -> EngineResult<Value>;
}

/// Recursively search a JSON value for the first matching key
/// (case-insensitive) and return its value, walking arrays and objects.
pub fn walk_find<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k.eq_ignore_ascii_case(key) {
                    return Some(v);
                }
            }
            for v in map.values() {
                if let Some(found) = walk_find(v, key) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => {
            for item in items {
                if let Some(found) = walk_find(item, key) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

/// Find the first of several candidate keys (in order) and coerce to f64.
pub fn walk_find_first_float(value: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(found) = walk_find(value, key) {
            if let Some(f) = coerce_f64(found) {
                return Some(f);
            }
        }
    }
    None
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn require_object(value: &Value) -> EngineResult<&serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| EngineError::DataShape("expected a JSON object".to_string()))
}
