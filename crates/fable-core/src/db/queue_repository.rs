//! Pending-change queue table access
//!
//! The queue holds at most one row per `(type, entity_id)`: putting a newer
//! change for an entity that is already queued replaces the old row in place,
//! so the queue always reflects only the latest intended state per entity.

use libsql::{Connection, Row};

use crate::error::Result;
use crate::models::PendingChange;

use super::{decode_document, encode_document, opt_text, text_param, SharedDatabase};

/// Raw access to the `sync_queue` table
#[derive(Clone)]
pub struct QueueRepository {
    db: SharedDatabase,
}

impl QueueRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Insert or replace the queued change for `(type, entity_id)`.
    ///
    /// Replacement resets retry accounting; the new mutation has not failed
    /// yet. `created_at` keeps the original enqueue time so drain order stays
    /// oldest-first.
    pub async fn put(&self, change: &PendingChange) -> Result<()> {
        let conn = self.db.conn().await?;
        Self::put_with(&conn, change).await
    }

    /// Same as [`put`](Self::put), against a caller-supplied connection.
    ///
    /// Used by the entity repository to enqueue inside the same transaction
    /// as the row write.
    pub(crate) async fn put_with(conn: &Connection, change: &PendingChange) -> Result<()> {
        let data = match &change.data {
            Some(doc) => Some(encode_document(doc)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO sync_queue
                (type, entity_id, user_id, operation, timestamp,
                 retry_count, last_error, data, created_at)
             VALUES (?, ?, ?, ?, ?, 0, NULL, ?, ?)
             ON CONFLICT (type, entity_id) DO UPDATE SET
                user_id = excluded.user_id,
                operation = excluded.operation,
                timestamp = excluded.timestamp,
                retry_count = 0,
                last_error = NULL,
                data = excluded.data",
            (
                change.kind.code(),
                change.entity_id.as_str(),
                change.user_id.clone(),
                change.op.to_string(),
                change.timestamp,
                text_param(data),
                change.created_at,
            ),
        )
        .await?;

        Ok(())
    }

    /// List a user's queued changes, oldest first
    pub async fn oldest_first(&self, user_id: &str) -> Result<Vec<PendingChange>> {
        let conn = self.db.conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, type, entity_id, user_id, operation, timestamp,
                        retry_count, last_error, data, created_at
                 FROM sync_queue
                 WHERE user_id = ?
                 ORDER BY created_at ASC, id ASC",
                [user_id],
            )
            .await?;

        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            changes.push(Self::parse_change(&row)?);
        }
        Ok(changes)
    }

    /// Remove a queue row after its push has been acknowledged
    pub async fn remove(&self, id: i64) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(())
    }

    /// Record a failed push: bump `retry_count`, store the error, keep the row
    pub async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ? WHERE id = ?",
            (error, id),
        )
        .await?;
        Ok(())
    }

    /// Number of changes queued for a user
    pub async fn len(&self, user_id: &str) -> Result<u64> {
        let conn = self.db.conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sync_queue WHERE user_id = ?",
                [user_id],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// Drop every queued change (account logout)
    pub async fn clear(&self) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute("DELETE FROM sync_queue", ()).await?;
        Ok(())
    }

    fn parse_change(row: &Row) -> Result<PendingChange> {
        let kind: String = row.get(1)?;
        let entity_id: String = row.get(2)?;
        let op: String = row.get(4)?;
        let last_error = opt_text(row.get_value(7)?)?;
        let data = match opt_text(row.get_value(8)?)? {
            Some(raw) => Some(decode_document(&raw)?),
            None => None,
        };

        Ok(PendingChange {
            id: row.get(0)?,
            kind: kind.parse()?,
            entity_id: entity_id
                .parse()
                .map_err(|_| crate::error::Error::Database("invalid entity id in queue".into()))?,
            user_id: row.get(3)?,
            op: op.parse()?,
            timestamp: row.get(5)?,
            retry_count: u32::try_from(row.get::<i64>(6)?).unwrap_or(0),
            last_error,
            data,
            created_at: row.get(9)?,
        })
    }
}
