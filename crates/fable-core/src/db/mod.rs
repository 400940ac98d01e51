//! Database layer for Fable

mod connection;
mod entity_repository;
mod meta_repository;
mod migrations;
mod queue_repository;

pub use connection::{Database, SharedDatabase};
pub use entity_repository::EntityRepository;
pub use meta_repository::MetaRepository;
pub use queue_repository::QueueRepository;

use crate::error::{Error, Result};
use crate::remote::{document_from_json, document_to_json, Document};

/// Serialize a wire document into its stored TEXT form
pub(crate) fn encode_document(doc: &Document) -> Result<String> {
    Ok(serde_json::to_string(&document_to_json(doc))?)
}

/// Parse a stored TEXT column back into a wire document
pub(crate) fn decode_document(raw: &str) -> Result<Document> {
    document_from_json(&serde_json::from_str(raw)?)
}

/// Read a nullable TEXT column from a libsql row value
pub(crate) fn opt_text(value: libsql::Value) -> Result<Option<String>> {
    match value {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(Error::Database(format!(
            "expected TEXT or NULL column, got {other:?}"
        ))),
    }
}

/// Read a nullable INTEGER column from a libsql row value
pub(crate) fn opt_integer(value: libsql::Value) -> Result<Option<i64>> {
    match value {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(i) => Ok(Some(i)),
        other => Err(Error::Database(format!(
            "expected INTEGER or NULL column, got {other:?}"
        ))),
    }
}

/// Nullable TEXT parameter for libsql statements
pub(crate) fn text_param(value: Option<String>) -> libsql::Value {
    value.map_or(libsql::Value::Null, libsql::Value::Text)
}

/// Nullable INTEGER parameter for libsql statements
pub(crate) fn integer_param(value: Option<i64>) -> libsql::Value {
    value.map_or(libsql::Value::Null, libsql::Value::Integer)
}
