//! Per-execution mutable state for templates.
//!
//! The scratch pad is a flat key/value store with nested-map helpers;
//! the local map is a richer container with Java-flavored accessors.
//! Both are rebuilt for every execute call, so nothing leaks between
//! renders.

use std::collections::BTreeMap;

use super::value::Value;
use crate::errors::TemplateError;

/// Key/value scratch space exposed as `scratch.*` helpers.
#[derive(Default)]
pub(crate) struct Scratch {
    data: BTreeMap<String, Value>,
}

impl Scratch {
    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Write-if-absent variant of `set`.
    pub fn set_x(&mut self, key: &str, value: Value) {
        self.data.entry(key.to_string()).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn map_set(&mut self, name: &str, key: &str, value: Value) {
        self.map_entry(name).insert(key.to_string(), value);
    }

    pub fn map_set_x(&mut self, name: &str, key: &str, value: Value) {
        self.map_entry(name).entry(key.to_string()).or_insert(value);
    }

    /// Values of the named map, ordered by key. Missing maps yield an
    /// empty list.
    pub fn map_values(&self, name: &str) -> Value {
        match self.data.get(name) {
            Some(Value::Map(m)) => Value::List(m.values().cloned().collect()),
            _ => Value::List(Vec::new()),
        }
    }

    fn map_entry(&mut self, name: &str) -> &mut BTreeMap<String, Value> {
        let slot = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(BTreeMap::new());
        }
        match slot {
            Value::Map(m) => m,
            _ => unreachable!(),
        }
    }
}

/// The local map exposed as `localMap.*` helpers.
#[derive(Default)]
pub(crate) struct TemplateMap {
    data: BTreeMap<String, Value>,
}

impl TemplateMap {
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        self.data.values().any(|v| v == value)
    }

    pub fn get(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn key_set(&self) -> Value {
        Value::List(self.data.keys().map(|k| Value::from(k.as_str())).collect())
    }

    /// Returns the previous value for the key, or null.
    pub fn put(&mut self, key: &str, value: Value) -> Value {
        self.data
            .insert(key.to_string(), value)
            .unwrap_or(Value::Null)
    }

    pub fn put_all(&mut self, other: &BTreeMap<String, Value>) {
        for (k, v) in other {
            self.data.insert(k.clone(), v.clone());
        }
    }

    pub fn remove(&mut self, key: &str) -> Value {
        self.data.remove(key).unwrap_or(Value::Null)
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }

    pub fn values(&self) -> Value {
        Value::List(self.data.values().cloned().collect())
    }

    /// Merges the top-level entries of a JSON object into the map.
    pub fn parse_json(&mut self, text: &str) -> Result<(), TemplateError> {
        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| TemplateError::Exec(format!("invalid JSON: {}", e)))?;
        match parsed {
            Value::Map(m) => {
                self.put_all(&m);
                Ok(())
            }
            _ => Err(TemplateError::Exec(
                "ParseJSON expects a JSON object".to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> Result<String, TemplateError> {
        serde_json::to_string(&self.data)
            .map_err(|e| TemplateError::Exec(format!("JSON encoding failed: {}", e)))
    }
}

#[cfg(test)]
mod scratch_test {
    use super::*;

    #[test]
    fn test_set_x_does_not_overwrite() {
        let mut s = Scratch::default();
        s.set("k", Value::from("a"));
        s.set_x("k", Value::from("b"));
        assert_eq!(s.get("k"), Value::from("a"));
        s.set("k", Value::from("b"));
        assert_eq!(s.get("k"), Value::from("b"));
    }

    #[test]
    fn test_map_values_sorted_by_key() {
        let mut s = Scratch::default();
        s.map_set("m", "b", Value::from(2));
        s.map_set("m", "a", Value::from(1));
        assert_eq!(
            s.map_values("m"),
            Value::List(vec![Value::from(1), Value::from(2)])
        );
        assert_eq!(s.map_values("absent"), Value::List(Vec::new()));
    }

    #[test]
    fn test_template_map_put_returns_previous() {
        let mut m = TemplateMap::default();
        assert_eq!(m.put("k", Value::from(1)), Value::Null);
        assert_eq!(m.put("k", Value::from(2)), Value::from(1));
        assert_eq!(m.size(), 1);
        assert_eq!(m.remove("k"), Value::from(2));
        assert!(m.is_empty());
    }

    #[test]
    fn test_template_map_parse_json() {
        let mut m = TemplateMap::default();
        m.parse_json(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert!(m.contains_key("a"));
        assert_eq!(m.get("b"), Value::from("two"));
        assert!(m.parse_json("[1,2]").is_err());
    }
}
