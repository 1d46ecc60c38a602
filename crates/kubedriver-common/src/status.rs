//! Typed partial updates of a resource's status
//!
//! A [`StatusPatch`] is an ordered list of `(field path, value)` pairs under
//! `status`. It renders to a JSON merge patch, so applying it never needs a
//! read-modify-write cycle and cannot conflict with concurrent writers of
//! other fields.

use serde_json::{Map, Value};

/// Ordered set of status field assignments
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusPatch {
    fields: Vec<(String, Value)>,
}

impl StatusPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to the status field at `path`
    ///
    /// Paths are dot-separated (`"conditions.ready"`). Later assignments to
    /// the same path win.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    /// Assign `value` only when it is present
    pub fn set_opt(self, path: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(path, v),
            None => self,
        }
    }

    /// True when the patch assigns nothing
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field assignments in the order they were made
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Value assigned to `path`, if any (last assignment wins)
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }

    /// Render as a JSON merge patch: `{"status": {...}}`
    pub fn to_merge_patch(&self) -> Value {
        let mut status = Map::new();
        for (path, value) in &self.fields {
            insert_path(&mut status, path, value.clone());
        }
        serde_json::json!({ "status": Value::Object(status) })
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}
