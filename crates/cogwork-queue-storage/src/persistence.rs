//! Atomic queue persistence with optimistic concurrency.
//!
//! Every mutating operation above this layer follows the same shape:
//! load → mutate in memory → conditional save on the loaded `version`.
//! Two concurrent mutators race, one wins the conditional write, the other
//! reloads and replays its mutation. No locks anywhere in the fleet.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use cogwork_queue_types::{EngineError, TaskQueue};

use crate::snapshot::SnapshotStore;
use crate::traits::{OpContext, QueueStore, SnapshotReason, StoredQueue};
use crate::validator;

/// Options for a single save.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Write a before-update snapshot first.
    pub create_snapshot: bool,
    /// Run integrity validation and reject on critical issues.
    pub validate_before_save: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            create_snapshot: false,
            validate_before_save: true,
        }
    }
}

impl SaveOptions {
    /// Options used when persisting a repaired or restored queue:
    /// snapshot the pre-image, skip re-validation.
    pub fn repair() -> Self {
        Self {
            create_snapshot: true,
            validate_before_save: false,
        }
    }

    /// Options used when persisting a restored snapshot: no snapshot of the
    /// corrupt pre-image, no validation of the already-vetted content.
    pub fn restore() -> Self {
        Self {
            create_snapshot: false,
            validate_before_save: false,
        }
    }
}

/// Tuning for the atomic-update retry loop.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Conflict retries before `PER_RETRIES_EXHAUSTED`.
    pub max_save_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_save_attempts: 5,
            base_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

/// Atomic persistence over a `QueueStore` backend.
pub struct PersistenceStore {
    store: Arc<dyn QueueStore>,
    snapshots: SnapshotStore,
    config: PersistenceConfig,
}

impl PersistenceStore {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&store)),
            store,
            config: PersistenceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying backend.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Exponential backoff for conflict retries: `base · 2^(attempt−1)`,
    /// capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Persist a queue with a conditional write on its current version.
    ///
    /// On success the queue's `version` is advanced in place and its
    /// checksum and timestamps are refreshed. On failure the caller's view
    /// is left at the pre-save version so a reload can replay cleanly.
    pub async fn save(
        &self,
        queue: &mut TaskQueue,
        options: SaveOptions,
    ) -> Result<(), EngineError> {
        if options.create_snapshot {
            self.snapshots
                .snapshot(queue, SnapshotReason::BeforeUpdate)
                .await?;
        }

        if options.validate_before_save {
            let report = validator::check(queue);
            if report.has_critical() {
                warn!(
                    player_id = %queue.player_id,
                    score = report.integrity_score,
                    "Rejecting save of a critically invalid queue"
                );
                return Err(EngineError::QueueUnrepairable(queue.player_id.clone()));
            }
        }

        let expect = if queue.version == 0 {
            None
        } else {
            Some(queue.version)
        };

        let now = Utc::now().timestamp_millis();
        let previous_version = queue.version;
        queue.version += 1;
        queue.last_updated_ms = now;
        queue.last_synced_ms = now;
        queue.last_validated_ms = now;
        queue.refresh_checksum();

        let record = StoredQueue::from_queue(queue).map_err(EngineError::from)?;
        match self.store.put_queue(record, expect).await {
            Ok(()) => {
                debug!(
                    player_id = %queue.player_id,
                    version = queue.version,
                    "Saved queue"
                );
                Ok(())
            }
            Err(err) => {
                queue.version = previous_version;
                Err(err.into())
            }
        }
    }

    /// Strongly-consistent load with integrity validation.
    ///
    /// An invalid but repairable queue is repaired, re-saved (snapshotting
    /// the pre-image, skipping re-validation), and returned. An
    /// unrepairable queue surfaces `PER_QUEUE_UNREPAIRABLE`.
    pub async fn load(&self, player_id: &str) -> Result<Option<TaskQueue>, EngineError> {
        let Some(record) = self.store.load_queue(player_id).await? else {
            return Ok(None);
        };
        let mut queue = record.to_queue().map_err(EngineError::from)?;

        let report = validator::check(&queue);
        if report.is_valid() {
            return Ok(Some(queue));
        }
        if !report.can_repair {
            warn!(
                player_id = %player_id,
                score = report.integrity_score,
                "Loaded queue is corrupted beyond repair"
            );
            return Err(EngineError::QueueUnrepairable(player_id.to_string()));
        }

        let actions = validator::repair(&mut queue, &report);
        self.save(&mut queue, SaveOptions::repair()).await?;
        info!(
            player_id = %player_id,
            score = report.integrity_score,
            actions = actions.len(),
            "Repaired queue during load"
        );
        Ok(Some(queue))
    }

    /// Load the queue, creating an empty one on first interaction.
    pub async fn load_or_create(&self, player_id: &str) -> Result<TaskQueue, EngineError> {
        match self.load(player_id).await? {
            Some(queue) => Ok(queue),
            None => Ok(TaskQueue::new(player_id)),
        }
    }

    /// Read-modify-write with conflict replay.
    ///
    /// `mutate` runs against freshly loaded state on every attempt, so a
    /// lost race re-derives the mutation instead of clobbering the winner.
    /// Honors the context's deadline and cancellation between attempts.
    pub async fn atomic_update<F>(
        &self,
        player_id: &str,
        ctx: &OpContext,
        options: SaveOptions,
        mut mutate: F,
    ) -> Result<TaskQueue, EngineError>
    where
        F: FnMut(&mut TaskQueue) -> Result<(), EngineError> + Send,
    {
        let mut attempt = 0u32;
        loop {
            ctx.check("atomic_update")?;

            let mut queue = self.load_or_create(player_id).await?;
            mutate(&mut queue)?;

            match self.save(&mut queue, options).await {
                Ok(()) => return Ok(queue),
                Err(EngineError::VersionConflict(_)) => {
                    attempt += 1;
                    if attempt >= self.config.max_save_attempts {
                        return Err(EngineError::RetriesExhausted(attempt));
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        player_id = %player_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Version conflict; reloading and retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Replace whatever is stored with `queue`, adopting the stored version
    /// so the conditional write succeeds over a corrupt record. Used by
    /// recovery (snapshot restore, fallback creation).
    pub async fn save_replacing(
        &self,
        queue: &mut TaskQueue,
        options: SaveOptions,
    ) -> Result<(), EngineError> {
        let stored_version = self
            .store
            .load_queue(&queue.player_id)
            .await?
            .map(|r| r.version);
        queue.version = stored_version.unwrap_or(0).max(queue.version);
        self.save(queue, options).await
    }
}
