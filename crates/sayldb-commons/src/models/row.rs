use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A unified row representation: an ordered map of column name to JSON value.
///
/// Rows serialize to plain JSON objects for clients. The live layer works on
/// JSON rows throughout; typed decoding is a client concern.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Build a row from a JSON object literal. Non-object values yield an
    /// empty row.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                values: map.into_iter().collect(),
            },
            _ => Self::default(),
        }
    }

    /// Helper to retrieve a value by column name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Apply a partial diff: every column in `patch` overwrites (or inserts)
    /// the corresponding column here. Columns absent from the patch are kept.
    pub fn apply_patch(&mut self, patch: &Row) {
        for (key, value) in &patch.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Restrict the row to the given columns (plus nothing else). Used for
    /// field-projected query results.
    pub fn project(&self, fields: &[String]) -> Row {
        let mut values = BTreeMap::new();
        for field in fields {
            if let Some(value) = self.values.get(field) {
                values.insert(field.clone(), value.clone());
            }
        }
        Row { values }
    }
}

impl From<Value> for Row {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}
