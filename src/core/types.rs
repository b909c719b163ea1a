use crate::core::{LockError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored document: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

/// Document identity: a string or an integer, kept in its stored JSON type so
/// selectors compare equal to the stored `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Int(i64),
    Str(String),
}

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Random v4 identity for documents created without one.
    pub fn generate() -> Self {
        Self::Str(uuid::Uuid::new_v4().to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    /// Reads the identity stored in a document. A missing or `null` `_id` is
    /// `Ok(None)`; any shape other than a string or an integer is rejected.
    pub fn from_document(document: &Document) -> Result<Option<Self>> {
        match document.get(ID_FIELD) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(Self::Str(s.clone()))),
            Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64().map(Self::Int)),
            Some(other) => Err(LockError::InvalidOperation(format!(
                "'{}' must be a string or an integer, got {}",
                ID_FIELD, other
            ))),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Resolves a dotted path (`address.street`, `phones.0.number`) inside a document.
///
/// Numeric segments index into arrays.
pub fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// `true` when one path equals the other or is a dotted prefix of it.
pub fn paths_overlap(left: &str, right: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.'
    }
    left == right || is_prefix(left, right) || is_prefix(right, left)
}
