//! Sync metadata table access

use crate::error::Result;
use crate::models::SyncMeta;

use super::SharedDatabase;

/// Repository over the per-user `sync_meta` baseline row
#[derive(Clone)]
pub struct MetaRepository {
    db: SharedDatabase,
}

impl MetaRepository {
    /// Create a new repository over the shared database
    #[must_use]
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Last confirmed sync baseline for a user, if any.
    ///
    /// `None` means the user has never completed a sync; the next pass must
    /// run in full mode.
    pub async fn last_synced_at(&self, user_id: &str) -> Result<Option<i64>> {
        let conn = self.db.conn().await?;
        let mut rows = conn
            .query(
                "SELECT last_synced_at FROM sync_meta WHERE user_id = ?",
                [user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Advance the baseline after a fully successful reconciliation pass
    pub async fn set_last_synced_at(&self, user_id: &str, timestamp: i64) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute(
            "INSERT INTO sync_meta (user_id, last_synced_at) VALUES (?, ?)
             ON CONFLICT (user_id) DO UPDATE SET last_synced_at = excluded.last_synced_at",
            (user_id, timestamp),
        )
        .await?;
        Ok(())
    }

    /// Load the full metadata record
    pub async fn get(&self, user_id: &str) -> Result<Option<SyncMeta>> {
        Ok(self
            .last_synced_at(user_id)
            .await?
            .map(|last_synced_at| SyncMeta {
                user_id: user_id.to_string(),
                last_synced_at,
            }))
    }

    /// Forget a user's baseline (logout); the next sync runs full
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let conn = self.db.conn().await?;
        conn.execute("DELETE FROM sync_meta WHERE user_id = ?", [user_id])
            .await?;
        Ok(())
    }
}
