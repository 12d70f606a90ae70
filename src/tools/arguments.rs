//! Parsed tool-call arguments.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ChatLoopError;

/// Arguments the model supplied for one tool call.
///
/// Models occasionally send arguments that are not valid JSON; those arrive
/// here as a bare `Value::String` holding the raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    raw: Value,
}

impl ToolArguments {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.raw.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.raw.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.raw.get(key).and_then(Value::as_bool)
    }

    /// Required string argument.
    pub fn require_str(&self, key: &str) -> Result<&str, ChatLoopError> {
        self.get_str(key).ok_or_else(|| {
            ChatLoopError::InvalidState(format!("missing required string argument '{key}'"))
        })
    }

    /// Deserialize the whole argument object into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ChatLoopError> {
        Ok(serde_json::from_value(self.raw.clone())?)
    }
}

impl From<Value> for ToolArguments {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}
