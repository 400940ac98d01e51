//! Entity table access
//!
//! One repository covers all six entity tables; the table is picked from the
//! record's [`EntityKind`]. Local writes enqueue their pending change in the
//! same transaction as the row write, so a crash can never leave a mutation
//! that the sync queue does not know about.

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{ChangeOp, EntityId, EntityKind, EntityRecord, PendingChange};

use super::{
    decode_document, encode_document, integer_param, opt_integer, opt_text, text_param,
    QueueRepository, SharedDatabase,
};

/// Sentinel that sorts records without an importance value last
const NO_IMPORTANCE: i64 = i64::MAX;

/// Repository over the entity tables
#[derive(Clone)]
pub struct EntityRepository {
    db: SharedDatabase,
}

impl EntityRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Write a local mutation: upsert the row and enqueue the pending change
    /// in one transaction.
    pub async fn upsert(&self, record: &EntityRecord) -> Result<()> {
        let conn = self.db.conn().await?;

        let op = if self.exists(&conn, record.kind, record.id).await? {
            ChangeOp::Update
        } else {
            ChangeOp::Create
        };
        let change = PendingChange::for_write(record, op);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            Self::write_row(&conn, record).await?;
            QueueRepository::put_with(&conn, &change).await
        }
        .await;

        Self::finish(&conn, result).await
    }

    /// Tombstone a record: mark it deleted and enqueue the remote delete in
    /// one transaction. The row stays behind for tombstone propagation until
    /// a later garbage-collection pass removes it.
    pub async fn soft_delete(&self, kind: EntityKind, id: EntityId) -> Result<()> {
        let conn = self.db.conn().await?;
        let mut record = self
            .fetch(&conn, kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        record.deleted = true;
        record.touch();
        let change = PendingChange::for_write(&record, ChangeOp::Delete);

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let result = async {
            Self::write_row(&conn, &record).await?;
            QueueRepository::put_with(&conn, &change).await
        }
        .await;

        Self::finish(&conn, result).await
    }

    /// Get a record by id, tombstoned rows included (sync-side read)
    pub async fn get(&self, kind: EntityKind, id: EntityId) -> Result<Option<EntityRecord>> {
        let conn = self.db.conn().await?;
        self.fetch(&conn, kind, id).await
    }

    /// List a story's sub-entities, excluding tombstones, in read-path order
    /// (importance first, then recency)
    pub async fn get_by_story(
        &self,
        kind: EntityKind,
        story_id: EntityId,
    ) -> Result<Vec<EntityRecord>> {
        if !kind.has_parent() {
            return Err(Error::InvalidInput(
                "stories have no parent story; use list_for_user".to_string(),
            ));
        }

        let conn = self.db.conn().await?;
        let sql = format!(
            "SELECT {} FROM {}
             WHERE story_id = ? AND deleted = 0
             ORDER BY COALESCE(importance, {NO_IMPORTANCE}) ASC, updated_at DESC",
            Self::columns(kind),
            kind.table_name(),
        );
        let mut rows = conn.query(&sql, [story_id.as_str()]).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(kind, &row)?);
        }
        Ok(records)
    }

    /// List a user's records of one kind, excluding tombstones, newest first
    pub async fn list_for_user(
        &self,
        kind: EntityKind,
        user_id: &str,
    ) -> Result<Vec<EntityRecord>> {
        let conn = self.db.conn().await?;
        let sql = format!(
            "SELECT {} FROM {}
             WHERE user_id = ? AND deleted = 0
             ORDER BY updated_at DESC",
            Self::columns(kind),
            kind.table_name(),
        );
        let mut rows = conn.query(&sql, [user_id]).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(kind, &row)?);
        }
        Ok(records)
    }

    /// Apply a record pulled from the remote store, last-write-wins.
    ///
    /// The local row survives when its `updated_at` is newer; otherwise the
    /// remote version is written with `synced = 1` and without touching the
    /// queue. Returns whether the remote version was applied.
    pub async fn apply_remote(&self, record: &EntityRecord) -> Result<bool> {
        let conn = self.db.conn().await?;

        if let Some(local) = self.fetch(&conn, record.kind, record.id).await? {
            if local.updated_at >= record.updated_at {
                tracing::debug!(
                    "Keeping local {} {} (local {} >= remote {})",
                    record.kind,
                    record.id,
                    local.updated_at,
                    record.updated_at
                );
                return Ok(false);
            }
        }

        let mut applied = record.clone();
        applied.synced = true;
        Self::write_row(&conn, &applied).await?;
        Ok(true)
    }

    /// Mark a record as acknowledged by the remote store
    pub async fn mark_synced(&self, kind: EntityKind, id: EntityId) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute(
            &format!("UPDATE {} SET synced = 1 WHERE id = ?", kind.table_name()),
            [id.as_str()],
        )
        .await?;
        Ok(())
    }

    /// Garbage-collect tombstones whose remote deletion has been confirmed
    /// (`synced = 1`) and whose retention window has passed. Children go
    /// first so story cascades never race the per-table deletes.
    pub async fn purge_tombstones(&self, user_id: &str, retention_ms: i64) -> Result<u64> {
        let conn = self.db.conn().await?;
        let cutoff = chrono::Utc::now().timestamp_millis() - retention_ms;

        let mut purged = 0;
        for kind in EntityKind::ALL.iter().rev() {
            purged += conn
                .execute(
                    &format!(
                        "DELETE FROM {}
                         WHERE user_id = ? AND deleted = 1 AND synced = 1 AND updated_at < ?",
                        kind.table_name()
                    ),
                    (user_id, cutoff),
                )
                .await?;
        }

        if purged > 0 {
            tracing::debug!("Purged {purged} tombstones for user {user_id}");
        }
        Ok(purged)
    }

    async fn exists(&self, conn: &Connection, kind: EntityKind, id: EntityId) -> Result<bool> {
        let mut rows = conn
            .query(
                &format!("SELECT 1 FROM {} WHERE id = ?", kind.table_name()),
                [id.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn fetch(
        &self,
        conn: &Connection,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<EntityRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            Self::columns(kind),
            kind.table_name()
        );
        let mut rows = conn.query(&sql, [id.as_str()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(kind, &row)?)),
            None => Ok(None),
        }
    }

    const fn columns(kind: EntityKind) -> &'static str {
        if kind.has_parent() {
            "id, user_id, story_id, data, importance, created_at, updated_at, synced, deleted"
        } else {
            "id, user_id, NULL, data, importance, created_at, updated_at, synced, deleted"
        }
    }

    async fn write_row(conn: &Connection, record: &EntityRecord) -> Result<()> {
        if record.kind.has_parent() && record.story_id.is_none() {
            return Err(Error::InvalidInput(format!(
                "{} {} requires a parent story",
                record.kind, record.id
            )));
        }

        let data = encode_document(&record.fields)?;
        let table = record.kind.table_name();

        if record.kind.has_parent() {
            conn.execute(
                &format!(
                    "INSERT INTO {table}
                        (id, user_id, story_id, data, importance,
                         created_at, updated_at, synced, deleted)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (id) DO UPDATE SET
                        user_id = excluded.user_id,
                        story_id = excluded.story_id,
                        data = excluded.data,
                        importance = excluded.importance,
                        updated_at = excluded.updated_at,
                        synced = excluded.synced,
                        deleted = excluded.deleted"
                ),
                (
                    record.id.as_str(),
                    record.user_id.clone(),
                    text_param(record.story_id.map(|id| id.as_str())),
                    data,
                    integer_param(record.importance),
                    record.created_at,
                    record.updated_at,
                    i64::from(record.synced),
                    i64::from(record.deleted),
                ),
            )
            .await?;
        } else {
            conn.execute(
                &format!(
                    "INSERT INTO {table}
                        (id, user_id, data, importance,
                         created_at, updated_at, synced, deleted)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (id) DO UPDATE SET
                        user_id = excluded.user_id,
                        data = excluded.data,
                        importance = excluded.importance,
                        updated_at = excluded.updated_at,
                        synced = excluded.synced,
                        deleted = excluded.deleted"
                ),
                (
                    record.id.as_str(),
                    record.user_id.clone(),
                    data,
                    integer_param(record.importance),
                    record.created_at,
                    record.updated_at,
                    i64::from(record.synced),
                    i64::from(record.deleted),
                ),
            )
            .await?;
        }

        Ok(())
    }

    async fn finish(conn: &Connection, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }

    fn parse_record(kind: EntityKind, row: &Row) -> Result<EntityRecord> {
        let id: String = row.get(0)?;
        let story_id = match opt_text(row.get_value(2)?)? {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| Error::Database(format!("invalid story_id: {raw}")))?,
            ),
            None => None,
        };
        let data: String = row.get(3)?;

        Ok(EntityRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid entity id: {id}")))?,
            kind,
            user_id: row.get(1)?,
            story_id,
            fields: decode_document(&data)?,
            importance: opt_integer(row.get_value(4)?)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            synced: row.get::<i64>(7)? != 0,
            deleted: row.get::<i64>(8)? != 0,
        })
    }
}
