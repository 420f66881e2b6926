//! Typed field values and the ordered field map that carries them.
//!
//! HTSP messages are ordered mappings from field name to a typed value.
//! The value kinds mirror the HTSMSG wire types one to one, so anything
//! representable here within the nesting limit survives an encode/decode
//! round trip.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FieldError;

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Signed 64-bit integer (HTSMSG `S64`).
    Int(i64),
    /// UTF-8 string (HTSMSG `STR`).
    Str(String),
    /// Opaque binary blob (HTSMSG `BIN`).
    Bin(Bytes),
    /// Nested mapping (HTSMSG `MAP`).
    Map(FieldMap),
    /// Ordered list of values (HTSMSG `LIST`).
    List(Vec<Value>),
}

impl Value {
    /// Human readable name of the value kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Bin(_) => "bin",
            Value::Map(_) => "map",
            Value::List(_) => "list",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&Bytes> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(i64::from(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bin(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bin(Bytes::from(b))
    }
}

impl From<FieldMap> for Value {
    fn from(m: FieldMap) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

/// An ordered mapping of field name to [`Value`].
///
/// Insertion order is preserved and is part of equality. Inserting an
/// existing name replaces the value in its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    fields: Vec<(String, Value)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Insert a field, returning the previous value if the name existed.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Typed accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Optional integer field; a present field of another type is an error.
    pub fn opt_i64(&self, name: &'static str) -> Result<Option<i64>, FieldError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Int(n)) => Ok(Some(*n)),
            Some(other) => Err(FieldError::WrongType {
                field: name,
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }

    /// Required integer field.
    pub fn req_i64(&self, name: &'static str) -> Result<i64, FieldError> {
        self.opt_i64(name)?.ok_or(FieldError::Missing(name))
    }

    /// Optional string field; a present field of another type is an error.
    pub fn opt_str(&self, name: &'static str) -> Result<Option<&str>, FieldError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(FieldError::WrongType {
                field: name,
                expected: "str",
                actual: other.type_name(),
            }),
        }
    }

    /// Required string field.
    pub fn req_str(&self, name: &'static str) -> Result<&str, FieldError> {
        self.opt_str(name)?.ok_or(FieldError::Missing(name))
    }
}

/// Single pass. A repeated name keeps its first position and its last value.
impl FromIterator<(String, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(iter.size_hint().0);
        let mut index: HashMap<String, usize> = HashMap::with_capacity(iter.size_hint().0);

        for (name, value) in iter {
            match index.entry(name) {
                Entry::Occupied(slot) => fields[*slot.get()].1 = value,
                Entry::Vacant(slot) => {
                    fields.push((slot.key().clone(), value));
                    slot.insert(fields.len() - 1);
                }
            }
        }
        Self { fields }
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
