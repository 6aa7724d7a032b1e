//! Column values and identity keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single column value as it crosses the driver boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Hashable form for identity keys.
    pub fn key_part(&self) -> KeyPart {
        match self {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Int(i64::from(*b)),
            Value::Int(n) => KeyPart::Int(*n),
            Value::Double(d) => KeyPart::Bits(d.to_bits()),
            Value::Text(s) => KeyPart::Text(s.clone()),
            Value::Blob(b) => KeyPart::Blob(b.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
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

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Hashable component of an object id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Int(i64),
    Bits(u64),
    Text(String),
    Blob(Vec<u8>),
}

/// Key of the identity cache: the hierarchy root plus the id values.
pub type IdKey = Vec<KeyPart>;

pub(crate) fn id_key(id: &[Value]) -> IdKey {
    id.iter().map(Value::key_part).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_and_int_share_a_key() {
        assert_eq!(Value::Bool(true).key_part(), Value::Int(1).key_part());
        assert_ne!(Value::Text("1".into()).key_part(), Value::Int(1).key_part());
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(3).as_int(), Some(3));
    }
}
