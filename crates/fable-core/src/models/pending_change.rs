//! Pending-change model
//!
//! A pending change is one durable row in the sync queue: the latest local
//! mutation for an entity that the remote store has not yet acknowledged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{EntityId, EntityKind, EntityRecord};
use crate::remote::Document;

/// The mutation a pending change carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for ChangeOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// A queued local mutation awaiting push to the remote store.
///
/// At most one pending change exists per `(kind, entity_id)`; enqueuing a
/// newer mutation for the same entity replaces the older row.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Queue row identifier
    pub id: i64,
    /// Entity type the change applies to
    pub kind: EntityKind,
    /// Entity the change applies to
    pub entity_id: EntityId,
    /// Owning user
    pub user_id: String,
    /// What to do at the remote store
    pub op: ChangeOp,
    /// When the mutation happened (Unix ms)
    pub timestamp: i64,
    /// How many pushes of this row have failed so far
    pub retry_count: u32,
    /// Error from the most recent failed push
    pub last_error: Option<String>,
    /// Document to upsert (None for deletes)
    pub data: Option<Document>,
    /// When the row was first enqueued (Unix ms)
    pub created_at: i64,
}

impl PendingChange {
    /// Build the pending change for a local write of `record`
    #[must_use]
    pub fn for_write(record: &EntityRecord, op: ChangeOp) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let data = match op {
            ChangeOp::Delete => None,
            ChangeOp::Create | ChangeOp::Update => Some(record.to_document()),
        };
        Self {
            id: 0,
            kind: record.kind,
            entity_id: record.id,
            user_id: record.user_id.clone(),
            op,
            timestamp: record.updated_at,
            retry_count: 0,
            last_error: None,
            data,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_op_roundtrip() {
        for op in [ChangeOp::Create, ChangeOp::Update, ChangeOp::Delete] {
            let parsed: ChangeOp = op.to_string().parse().unwrap();
            assert_eq!(parsed, op);
        }
        assert!("merge".parse::<ChangeOp>().is_err());
    }

    #[test]
    fn test_for_write_delete_has_no_data() {
        let record = EntityRecord::new(EntityKind::Scene, "user-1");
        let change = PendingChange::for_write(&record, ChangeOp::Delete);
        assert!(change.data.is_none());
        assert_eq!(change.timestamp, record.updated_at);

        let change = PendingChange::for_write(&record, ChangeOp::Create);
        assert!(change.data.is_some());
    }
}
