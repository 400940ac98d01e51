//! Pending-change queue manager
//!
//! Drains the durable queue against the remote store, one item at a time,
//! oldest first. A row leaves the queue only after the remote store has
//! acknowledged its push; failures stay queued with their retry accounting
//! bumped and are retried on the next drain.

use std::sync::Arc;

use crate::db::{EntityRepository, QueueRepository, SharedDatabase};
use crate::error::Result;
use crate::models::{ChangeOp, PendingChange};
use crate::remote::RemoteStore;

/// Result of one queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Items pushed and acknowledged
    pub processed: u32,
    /// Items that failed and stay queued
    pub failed: u32,
}

/// Manager over the durable pending-change queue
#[derive(Clone)]
pub struct QueueManager {
    queue: QueueRepository,
    entities: EntityRepository,
    remote: Arc<dyn RemoteStore>,
}

impl QueueManager {
    /// Create a manager over the shared database and remote store
    #[must_use]
    pub fn new(db: SharedDatabase, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            queue: QueueRepository::new(db.clone()),
            entities: EntityRepository::new(db),
            remote,
        }
    }

    /// Enqueue a local mutation, replacing any queued change for the same
    /// entity
    pub async fn enqueue(&self, change: &PendingChange) -> Result<()> {
        self.queue.put(change).await
    }

    /// Drain the user's queue against the remote store.
    ///
    /// Pushes run sequentially to keep remote mutation ordering deterministic
    /// and retry bookkeeping per-item. A failed item never aborts the rest of
    /// the batch.
    pub async fn process_queue(&self, user_id: &str) -> Result<DrainOutcome> {
        let pending = self.queue.oldest_first(user_id).await?;
        if pending.is_empty() {
            return Ok(DrainOutcome::default());
        }

        tracing::debug!("Draining {} pending changes for {user_id}", pending.len());

        let mut outcome = DrainOutcome::default();
        for change in pending {
            match self.push_one(&change).await {
                Ok(()) => {
                    self.queue.remove(change.id).await?;
                    if change.op != ChangeOp::Delete {
                        self.entities
                            .mark_synced(change.kind, change.entity_id)
                            .await?;
                    }
                    outcome.processed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Push failed for {} {} (attempt {}): {e}",
                        change.kind,
                        change.entity_id,
                        change.retry_count + 1
                    );
                    self.queue.record_failure(change.id, &e.to_string()).await?;
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Number of changes waiting for a user
    pub async fn pending_count(&self, user_id: &str) -> Result<u64> {
        self.queue.len(user_id).await
    }

    /// Drop every queued change (account logout)
    pub async fn clear(&self) -> Result<()> {
        self.queue.clear().await
    }

    async fn push_one(&self, change: &PendingChange) -> Result<()> {
        let id = change.entity_id.as_str();
        match change.op {
            ChangeOp::Create | ChangeOp::Update => {
                let doc = change.data.as_ref().ok_or_else(|| {
                    crate::error::Error::InvalidInput(format!(
                        "queued {} for {} has no document",
                        change.op, change.entity_id
                    ))
                })?;
                self.remote.upsert(change.kind, &id, doc).await
            }
            ChangeOp::Delete => self.remote.delete(change.kind, &id).await,
        }
    }
}
