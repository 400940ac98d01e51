//! Typed wire values for remote documents
//!
//! The remote store speaks typed documents: every local field maps to one of
//! the variants below and back. The mapping must be reversible for every
//! primitive the domain model uses, so integers stay integers and doubles
//! stay doubles across a round trip.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A remote document: named fields, each a typed wire value.
pub type Document = BTreeMap<String, Value>;

/// A typed wire value as stored in a remote document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null / absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer (full i64 range)
    Integer(i64),
    /// Double-precision float
    Double(f64),
    /// UTF-8 text
    Text(String),
    /// Nested list
    Array(Vec<Value>),
    /// Nested map with string keys
    Map(Document),
}

impl Value {
    /// Encode into the JSON representation sent over the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::Number((*i).into()),
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decode from the JSON representation received over the wire.
    ///
    /// JSON numbers that fit an `i64` decode as `Integer`; everything else
    /// numeric decodes as `Double`. This matches how `to_json` encodes, so
    /// `from_json(to_json(v)) == v` for every supported value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if let Some(d) = n.as_f64() {
                    Ok(Self::Double(d))
                } else {
                    Err(Error::InvalidInput(format!("unsupported number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Array(items) => Ok(Self::Array(
                items.iter().map(Self::from_json).collect::<Result<_>>()?,
            )),
            serde_json::Value::Object(map) => Ok(Self::Map(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), Self::from_json(value)?)))
                    .collect::<Result<_>>()?,
            )),
        }
    }

    /// Borrow the text content, if this is a `Text` value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an `Integer` value
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean content, if this is a `Bool` value
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Double content, if this is a `Double` value
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// Encode a whole document as a JSON object.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    Value::Map(doc.clone()).to_json()
}

/// Decode a JSON object into a document.
///
/// Errors if the top-level JSON value is not an object.
pub fn document_from_json(json: &serde_json::Value) -> Result<Document> {
    match Value::from_json(json)? {
        Value::Map(map) => Ok(map),
        other => Err(Error::InvalidInput(format!(
            "expected document object, got {other:?}"
        ))),
    }
}
