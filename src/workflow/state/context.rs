//! Variable context for conditional evaluation

use serde_json::{Map, Value};

/// Mutable variable bag that branch rules read and branch actions write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    fields: Map<String, Value>,
}

impl VariableContext {
    /// Create an empty context
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a context seeded with the given variables
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Set (or replace) a top-level variable
    pub fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    /// Remove a top-level variable, returning it
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Get a top-level variable
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a nested value using dot notation (e.g., "result.intent").
    ///
    /// An exact top-level key wins over a nested lookup, so variables whose
    /// names contain dots stay reachable.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.fields.get(path) {
            return Some(v);
        }

        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_path(path).is_some()
    }

    /// Convert to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Get all variable names
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}
