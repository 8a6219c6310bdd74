//! The tuple value container.

use std::collections::BTreeMap;

use serde_json::Value;

/// An ordered, opaque container of named values passed between operators.
///
/// Tuples are transient: a tuple is owned solely by the driver traversing
/// the operator graph for its lifetime and is never shared across drivers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuple {
    fields: BTreeMap<String, Value>,
}

impl Tuple {
    /// Create a new empty tuple.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the named field, replacing any previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Get the named field.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterate this tuple's fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Remove all fields, leaving an empty slot ready for reuse.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Whether this tuple has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
