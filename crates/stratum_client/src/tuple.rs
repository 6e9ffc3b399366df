//! User-facing record type: an ordered set of named fields.

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// An ordered sequence of `(column name, value)` pairs.
///
/// Column names are unique under ASCII-case-insensitive comparison. A tuple
/// may be a strict subset of a table schema, in any order; the codec looks
/// fields up by name, and fields the tuple does not contain are reported to
/// the server as intentionally omitted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuple {
    fields: Vec<(String, Value)>,
}

impl Tuple {
    pub fn new() -> Tuple {
        Tuple { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Tuple {
        Tuple {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Number of fields currently in the tuple.
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Ordinal of the named column, matched case-insensitively.
    pub fn column_ordinal(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(field, _)| field.eq_ignore_ascii_case(name))
    }

    /// Column name at the given ordinal.
    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.fields.get(ordinal).map(|(name, _)| name.as_str())
    }

    /// Raw value at the given ordinal.
    pub fn value(&self, ordinal: usize) -> Option<&Value> {
        self.fields.get(ordinal).map(|(_, value)| value)
    }

    /// Raw value of the named field, matched case-insensitively.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.column_ordinal(name).and_then(|i| self.value(i))
    }

    /// Typed value of the named field.
    ///
    /// Fails with [`Error::FieldNotFound`] when the field is absent and with
    /// [`Error::TypeMismatch`] when the stored tag disagrees with `T`.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        match self.get_value(name) {
            Some(value) => T::from_value(name, value),
            None => Err(Error::FieldNotFound(name.to_owned())),
        }
    }

    /// Insert a field, or overwrite the existing one with the same name.
    ///
    /// Overwriting keeps the original position and the original spelling of
    /// the column name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.column_ordinal(&name) {
            Some(ordinal) => self.fields[ordinal].1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Tuple {
        self.set(name, value);
        self
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}
