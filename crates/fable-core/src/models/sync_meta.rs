//! Sync metadata model

use serde::{Deserialize, Serialize};

/// Per-user sync baseline.
///
/// Holds the timestamp of the last fully successful reconciliation pass.
/// Absence of a row forces the next pass into full mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Owning user
    pub user_id: String,
    /// Last successful incremental-sync baseline (Unix ms)
    pub last_synced_at: i64,
}
