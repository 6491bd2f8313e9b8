//! In-memory queue storage backend.
//!
//! Suitable for development, testing, and single-instance deployments.
//! Records are stored in `HashMap`s behind `tokio::sync::RwLock`s; the
//! version check for conditional writes runs under the write lock, which
//! gives the same winner-takes-one semantics as a conditional expression in
//! a remote store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use cogwork_queue_types::CompletionEvent;

use crate::error::QueueStorageError;
use crate::traits::{MigrationRecord, QueueStore, SnapshotRecord, StoredQueue};

/// Configuration for the in-memory queue storage backend.
#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// Maximum completion events retained per player (0 = unlimited).
    pub max_events_per_player: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_events_per_player: 1_000,
        }
    }
}

/// In-memory queue storage backend.
#[derive(Clone)]
pub struct InMemoryQueueStore {
    queues: Arc<RwLock<HashMap<String, StoredQueue>>>,
    snapshots: Arc<RwLock<HashMap<String, SnapshotRecord>>>,
    events: Arc<RwLock<HashMap<String, Vec<CompletionEvent>>>>,
    migrations: Arc<RwLock<HashMap<String, MigrationRecord>>>,
    config: InMemoryQueueConfig,
}

impl InMemoryQueueStore {
    /// Create a new in-memory queue store with default configuration.
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    /// Create a new in-memory queue store with custom configuration.
    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(HashMap::new())),
            migrations: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn load_queue(
        &self,
        player_id: &str,
    ) -> Result<Option<StoredQueue>, QueueStorageError> {
        let queues = self.queues.read().await;
        Ok(queues.get(player_id).cloned())
    }

    async fn put_queue(
        &self,
        record: StoredQueue,
        expect_version: Option<u64>,
    ) -> Result<(), QueueStorageError> {
        let mut queues = self.queues.write().await;
        let stored = queues.get(&record.player_id).map(|r| r.version);

        match (expect_version, stored) {
            // Create: must not already exist.
            (None, Some(actual)) => {
                return Err(QueueStorageError::VersionConflict {
                    player_id: record.player_id,
                    expected: None,
                    stored: Some(actual),
                });
            }
            // Replace: stored version must match exactly.
            (Some(expected), actual) if actual != Some(expected) => {
                return Err(QueueStorageError::VersionConflict {
                    player_id: record.player_id,
                    expected: Some(expected),
                    stored: actual,
                });
            }
            _ => {}
        }

        debug!(
            player_id = %record.player_id,
            version = record.version,
            "Stored queue record"
        );
        queues.insert(record.player_id.clone(), record);
        Ok(())
    }

    async fn delete_queue(&self, player_id: &str) -> Result<bool, QueueStorageError> {
        let mut queues = self.queues.write().await;
        Ok(queues.remove(player_id).is_some())
    }

    async fn query_active_queues(&self, limit: u32) -> Result<Vec<String>, QueueStorageError> {
        let queues = self.queues.read().await;
        let mut active: Vec<&StoredQueue> = queues
            .values()
            .filter(|r| r.attributes.is_running == "true")
            .collect();
        // Oldest last_processed first so starved queues get attention.
        active.sort_by(|a, b| {
            a.attributes
                .last_processed
                .cmp(&b.attributes.last_processed)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        Ok(active
            .into_iter()
            .take(limit as usize)
            .map(|r| r.player_id.clone())
            .collect())
    }

    async fn queue_count(&self) -> Result<usize, QueueStorageError> {
        let queues = self.queues.read().await;
        Ok(queues.len())
    }

    async fn list_players(&self) -> Result<Vec<String>, QueueStorageError> {
        let queues = self.queues.read().await;
        let mut players: Vec<String> = queues.keys().cloned().collect();
        players.sort_unstable();
        Ok(players)
    }

    async fn put_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), QueueStorageError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.snapshot_id.clone(), snapshot);
        Ok(())
    }

    async fn get_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotRecord>, QueueStorageError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(snapshot_id).cloned())
    }

    async fn list_snapshots(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<SnapshotRecord>, QueueStorageError> {
        let snapshots = self.snapshots.read().await;
        let mut matching: Vec<&SnapshotRecord> = snapshots
            .values()
            .filter(|s| s.player_id == player_id)
            .collect();
        // Newest first; snapshot_id (UUID v7) breaks timestamp ties.
        matching.sort_by(|a, b| {
            b.timestamp_ms
                .cmp(&a.timestamp_ms)
                .then_with(|| b.snapshot_id.cmp(&a.snapshot_id))
        });
        Ok(matching
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, QueueStorageError> {
        let mut snapshots = self.snapshots.write().await;
        Ok(snapshots.remove(snapshot_id).is_some())
    }

    async fn append_event(&self, event: CompletionEvent) -> Result<(), QueueStorageError> {
        let mut events = self.events.write().await;
        let log = events.entry(event.player_id.clone()).or_default();
        log.push(event);
        let bound = self.config.max_events_per_player;
        if bound > 0 && log.len() > bound {
            let excess = log.len() - bound;
            log.drain(..excess);
        }
        Ok(())
    }

    async fn list_events(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<CompletionEvent>, QueueStorageError> {
        let events = self.events.read().await;
        let log = events.get(player_id).cloned().unwrap_or_default();
        Ok(log.into_iter().rev().take(limit as usize).collect())
    }

    async fn put_migration_record(
        &self,
        record: MigrationRecord,
    ) -> Result<(), QueueStorageError> {
        let mut migrations = self.migrations.write().await;
        migrations.insert(record.migration_id.clone(), record);
        Ok(())
    }

    async fn get_migration_record(
        &self,
        migration_id: &str,
    ) -> Result<Option<MigrationRecord>, QueueStorageError> {
        let migrations = self.migrations.read().await;
        Ok(migrations.get(migration_id).cloned())
    }

    async fn list_migration_records(&self) -> Result<Vec<MigrationRecord>, QueueStorageError> {
        let migrations = self.migrations.read().await;
        let mut records: Vec<MigrationRecord> = migrations.values().cloned().collect();
        records.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms));
        Ok(records)
    }

    async fn maintenance(&self) -> Result<(), QueueStorageError> {
        // No native TTL: sweep expired snapshots by hand.
        let now_epoch = Utc::now().timestamp();
        let mut snapshots = self.snapshots.write().await;
        let expired: Vec<String> = snapshots
            .values()
            .filter(|s| s.expires_at_epoch() <= now_epoch)
            .map(|s| s.snapshot_id.clone())
            .collect();
        for id in &expired {
            snapshots.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept expired snapshots");
        }
        Ok(())
    }
}
