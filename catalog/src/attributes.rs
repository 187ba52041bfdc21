//! Heterogeneous attribute maps carried by records and library items

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ValidationError, ValidationResult};

/// Ordered map of attribute names to dynamically typed values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.0.iter_mut()
    }

    /// Get a string value, `fallback` when the key is missing
    pub fn get_string(&self, key: &str, fallback: &str) -> ValidationResult<String> {
        match self.0.get(key) {
            None => Ok(fallback.to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(invalid_type(key, "string")),
        }
    }

    /// Get an integer value, `fallback` when the key is missing
    pub fn get_int(&self, key: &str, fallback: i64) -> ValidationResult<i64> {
        match self.0.get(key) {
            None => Ok(fallback),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid_type(key, "integer")),
            Some(_) => Err(invalid_type(key, "integer")),
        }
    }

    /// Get a float value, `fallback` when the key is missing. Integers are widened.
    pub fn get_float(&self, key: &str, fallback: f64) -> ValidationResult<f64> {
        match self.0.get(key) {
            None => Ok(fallback),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid_type(key, "float")),
            Some(_) => Err(invalid_type(key, "float")),
        }
    }

    /// Get a boolean value, `fallback` when the key is missing
    pub fn get_bool(&self, key: &str, fallback: bool) -> ValidationResult<bool> {
        match self.0.get(key) {
            None => Ok(fallback),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(invalid_type(key, "boolean")),
        }
    }

    /// Get a nested map, `fallback` when the key is missing
    pub fn get_map(&self, key: &str, fallback: Attributes) -> ValidationResult<Attributes> {
        match self.0.get(key) {
            None => Ok(fallback),
            Some(Value::Object(map)) => Ok(Attributes(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            Some(_) => Err(invalid_type(key, "map")),
        }
    }

    /// Get a list of strings; non-string elements are rendered
    pub fn get_string_list(&self, key: &str, fallback: Vec<String>) -> ValidationResult<Vec<String>> {
        match self.0.get(key) {
            None => Ok(fallback),
            Some(Value::Array(items)) => Ok(items.iter().map(render_value).collect()),
            Some(_) => Err(invalid_type(key, "list")),
        }
    }

    /// Copy entries from `other`; existing keys are kept unless `replace` is set
    pub fn merge(&mut self, other: &Attributes, replace: bool) {
        for (key, value) in &other.0 {
            if replace || !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Value rendered for template substitution; missing and null keys render empty
    pub fn render(&self, key: &str) -> String {
        self.0.get(key).map(render_value).unwrap_or_default()
    }

    /// Project the map to `string -> string`, expanding nested maps and lists
    ///
    /// Nested keys are joined with `glue` (`.` when empty); list elements use
    /// their index as key segment.
    pub fn flatten(&self, glue: &str) -> BTreeMap<String, String> {
        let glue = if glue.is_empty() { "." } else { glue };
        let mut result = BTreeMap::new();

        for (key, value) in &self.0 {
            flatten_into(&mut result, key.clone(), value, glue);
        }

        result
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: String, value: &Value, glue: &str) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_into(out, format!("{}{}{}", prefix, glue, key), value, glue);
            }
        }
        Value::Array(items) => {
            for (idx, value) in items.iter().enumerate() {
                flatten_into(out, format!("{}{}{}", prefix, glue, idx), value, glue);
            }
        }
        other => {
            out.insert(prefix, render_value(other));
        }
    }
}

/// Render a scalar the way it is shown to users; structures render as JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn invalid_type(key: &str, expected: &str) -> ValidationError {
    ValidationError::InvalidType {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

impl From<BTreeMap<String, Value>> for Attributes {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
