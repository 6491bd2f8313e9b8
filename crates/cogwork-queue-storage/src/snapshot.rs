//! Time-ordered queue snapshots with TTL and per-player pruning.
//!
//! Snapshots are compressed copies: bounded collections are trimmed on
//! write (last 5 history entries, last 100 reward entries) and
//! re-initialized to empty on restore. The store's TTL attribute expires
//! them after 30 days; after each write the per-player set is pruned to
//! `max_snapshots`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use cogwork_queue_types::{EngineError, QueueEventKind, TaskQueue};

use crate::error::QueueStorageError;
use crate::traits::{QueueStore, SNAPSHOT_TTL_SECONDS, SnapshotReason, SnapshotRecord};

/// History entries kept in a compressed snapshot.
pub const COMPRESS_HISTORY_KEEP: usize = 5;
/// Reward entries kept in a compressed snapshot.
pub const COMPRESS_REWARDS_KEEP: usize = 100;

/// Build a compressed snapshot record from a queue.
pub fn compress(
    queue: &TaskQueue,
    reason: SnapshotReason,
) -> Result<SnapshotRecord, QueueStorageError> {
    let mut frozen = queue.clone();
    if frozen.state_history.len() > COMPRESS_HISTORY_KEEP {
        let excess = frozen.state_history.len() - COMPRESS_HISTORY_KEEP;
        frozen.state_history.drain(..excess);
    }
    if frozen.totals.rewards_earned.len() > COMPRESS_REWARDS_KEEP {
        let excess = frozen.totals.rewards_earned.len() - COMPRESS_REWARDS_KEEP;
        frozen.totals.rewards_earned.drain(..excess);
    }

    Ok(SnapshotRecord {
        snapshot_id: SnapshotRecord::generate_id(),
        player_id: queue.player_id.clone(),
        timestamp_ms: Utc::now().timestamp_millis(),
        reason,
        version: queue.version,
        schema_version: queue.schema_version,
        checksum: queue.checksum.clone(),
        ttl_seconds: SNAPSHOT_TTL_SECONDS,
        snapshot_data: serde_json::to_string(&frozen)?,
    })
}

/// Snapshot lifecycle on top of a `QueueStore`.
pub struct SnapshotStore {
    store: Arc<dyn QueueStore>,
    max_snapshots: usize,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            max_snapshots: 10,
        }
    }

    pub fn with_max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots.max(1);
        self
    }

    /// Write a compressed snapshot and prune the player's set.
    pub async fn snapshot(
        &self,
        queue: &TaskQueue,
        reason: SnapshotReason,
    ) -> Result<SnapshotRecord, EngineError> {
        let record = compress(queue, reason)?;
        self.store.put_snapshot(record.clone()).await?;
        debug!(
            player_id = %queue.player_id,
            snapshot_id = %record.snapshot_id,
            reason = reason.as_str(),
            version = record.version,
            "Wrote queue snapshot"
        );
        self.prune(&queue.player_id).await?;
        Ok(record)
    }

    /// Newest-first snapshots for a player.
    pub async fn list(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<SnapshotRecord>, EngineError> {
        Ok(self.store.list_snapshots(player_id, limit).await?)
    }

    /// Rebuild a queue from a snapshot.
    ///
    /// Rejects snapshots belonging to a different player. Trimmed
    /// collections are re-initialized empty, `last_updated` moves to now,
    /// and the snapshot's version is kept so the subsequent conditional
    /// save replaces the live record it descended from.
    pub async fn restore_queue(
        &self,
        snapshot_id: &str,
        player_id: &str,
    ) -> Result<TaskQueue, EngineError> {
        let record = self
            .store
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| QueueStorageError::SnapshotNotFound(snapshot_id.to_string()))?;

        if record.player_id != player_id {
            return Err(QueueStorageError::SnapshotPlayerMismatch {
                snapshot_id: snapshot_id.to_string(),
                requested: player_id.to_string(),
                actual: record.player_id,
            }
            .into());
        }

        let mut queue: TaskQueue = serde_json::from_str(&record.snapshot_data)
            .map_err(QueueStorageError::from)?;
        queue.state_history.clear();
        queue.totals.rewards_earned.clear();
        queue.last_updated_ms = Utc::now().timestamp_millis();
        queue.version = record.version;
        queue.refresh_checksum();
        queue.push_history(
            QueueEventKind::Restored,
            None,
            Some(format!("from snapshot {}", snapshot_id)),
        );

        info!(
            player_id = %player_id,
            snapshot_id = %snapshot_id,
            version = queue.version,
            "Restored queue from snapshot"
        );
        Ok(queue)
    }

    /// Drop the oldest snapshots beyond `max_snapshots` for a player.
    pub async fn prune(&self, player_id: &str) -> Result<(), EngineError> {
        // One past the bound is enough to see what must go.
        let listed = self
            .store
            .list_snapshots(player_id, (self.max_snapshots as u32) * 2 + 1)
            .await?;
        if listed.len() <= self.max_snapshots {
            return Ok(());
        }
        for stale in &listed[self.max_snapshots..] {
            self.store.delete_snapshot(&stale.snapshot_id).await?;
        }
        debug!(
            player_id = %player_id,
            pruned = listed.len() - self.max_snapshots,
            "Pruned snapshots past the retention bound"
        );
        Ok(())
    }
}
