//! Ordered recovery pipeline with graceful degradation.
//!
//! Strategies run in order (snapshot restore, state repair, backup
//! restore, fallback creation) and the first success wins. Each attempt
//! gets its own sub-timeout. The per-player recovery circuit breaker gates
//! the whole pipeline: an open circuit returns a degraded emergency queue
//! immediately with the time until the next allowed attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use cogwork_queue_storage::{
    PersistenceStore, QueueStore, SaveOptions, SnapshotStore, validator,
};
use cogwork_queue_types::{EngineError, QueueConfig, TaskQueue};

use crate::resource::{DegradationLevel, ResourceMonitor};
use crate::retry::{OperationKind, RetryController};

/// Host-provided opaque local backup source (strategy 3).
#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Fetch the most recent backup blob for a player, if any. The blob is
    /// a serialized queue in the engine's own JSON layout.
    async fn fetch_backup(&self, player_id: &str) -> Result<Option<String>, EngineError>;
}

/// Which strategy produced the recovered queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    SnapshotRestore,
    StateRepair,
    BackupRestore,
    FallbackCreation,
    GracefulDegradation,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::SnapshotRestore => "snapshot_restore",
            RecoveryStrategy::StateRepair => "state_repair",
            RecoveryStrategy::BackupRestore => "backup_restore",
            RecoveryStrategy::FallbackCreation => "fallback_creation",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
        }
    }
}

/// Result of a recovery request.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub queue: TaskQueue,
    pub strategy: RecoveryStrategy,
    /// True when the result is a degraded stand-in rather than a restored
    /// queue (emergency queue, cached copy).
    pub degraded: bool,
    /// Milliseconds until the next recovery attempt is allowed, when the
    /// circuit is open.
    pub time_until_retry_ms: Option<u64>,
}

/// Snapshots consulted per recovery request.
const SNAPSHOT_CANDIDATES: u32 = 5;

/// Orchestrates the recovery strategies over the storage components. Holds
/// no back-references: persistence, snapshots, and retry are plain
/// dependencies.
pub struct RecoveryOrchestrator {
    persistence: Arc<PersistenceStore>,
    store: Arc<dyn QueueStore>,
    snapshots: Arc<SnapshotStore>,
    retry: Arc<RetryController>,
    monitor: Arc<ResourceMonitor>,
    backup: Option<Arc<dyn BackupProvider>>,
    strategy_timeout: Duration,
    /// Last known-good queue per player, served under minimal degradation.
    cache: Mutex<HashMap<String, TaskQueue>>,
}

impl RecoveryOrchestrator {
    pub fn new(
        persistence: Arc<PersistenceStore>,
        store: Arc<dyn QueueStore>,
        snapshots: Arc<SnapshotStore>,
        retry: Arc<RetryController>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            persistence,
            store,
            snapshots,
            retry,
            monitor,
            backup: None,
            strategy_timeout: Duration::from_secs(10),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backup_provider(mut self, backup: Arc<dyn BackupProvider>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_strategy_timeout(mut self, timeout: Duration) -> Self {
        self.strategy_timeout = timeout;
        self
    }

    /// Remember a known-good queue for degraded reads.
    pub fn cache_queue(&self, queue: &TaskQueue) {
        self.cache
            .lock()
            .insert(queue.player_id.clone(), queue.clone());
    }

    /// The emergency stand-in: same schema, paused unresumably, reduced
    /// limits.
    pub fn emergency_queue(player_id: &str) -> TaskQueue {
        let mut queue = TaskQueue::with_config(player_id, QueueConfig::emergency());
        queue.is_paused = true;
        queue.pause_reason = Some("System overload".to_string());
        queue.can_resume = false;
        queue.refresh_checksum();
        queue
    }

    /// Recover a player's queue through the ordered strategy pipeline.
    pub async fn recover(&self, player_id: &str) -> Result<RecoveryOutcome, EngineError> {
        // Circuit gate: open means immediate graceful degradation.
        if let Err(EngineError::CircuitOpen {
            time_until_retry_ms,
        }) = self.retry.guard(player_id, OperationKind::Recovery)
        {
            warn!(
                player_id = %player_id,
                time_until_retry_ms,
                "Recovery circuit open; returning emergency queue"
            );
            return Ok(RecoveryOutcome {
                queue: Self::emergency_queue(player_id),
                strategy: RecoveryStrategy::GracefulDegradation,
                degraded: true,
                time_until_retry_ms: Some(time_until_retry_ms),
            });
        }

        let level = self.monitor.level();
        match level {
            DegradationLevel::Severe => {
                warn!(player_id = %player_id, "Severe degradation; returning emergency queue");
                return Ok(RecoveryOutcome {
                    queue: Self::emergency_queue(player_id),
                    strategy: RecoveryStrategy::GracefulDegradation,
                    degraded: true,
                    time_until_retry_ms: None,
                });
            }
            DegradationLevel::Minimal => {
                if let Some(cached) = self.cache.lock().get(player_id).cloned() {
                    info!(player_id = %player_id, "Minimal degradation; serving cached queue");
                    return Ok(RecoveryOutcome {
                        queue: cached,
                        strategy: RecoveryStrategy::GracefulDegradation,
                        degraded: true,
                        time_until_retry_ms: None,
                    });
                }
            }
            DegradationLevel::Moderate => {
                // Shortest path: trust the stored checksum, skip validation.
                if let Ok(Some(record)) = self.store.load_queue(player_id).await {
                    if let Ok(queue) = record.to_queue() {
                        info!(
                            player_id = %player_id,
                            "Moderate degradation; trusting stored record"
                        );
                        self.retry.on_success(player_id, OperationKind::Recovery);
                        return Ok(RecoveryOutcome {
                            queue,
                            strategy: RecoveryStrategy::StateRepair,
                            degraded: true,
                            time_until_retry_ms: None,
                        });
                    }
                }
            }
            DegradationLevel::None => {}
        }

        let strategies = [
            RecoveryStrategy::SnapshotRestore,
            RecoveryStrategy::StateRepair,
            RecoveryStrategy::BackupRestore,
            RecoveryStrategy::FallbackCreation,
        ];

        for strategy in strategies {
            let attempt = async {
                match strategy {
                    RecoveryStrategy::SnapshotRestore => {
                        self.try_snapshot_restore(player_id).await
                    }
                    RecoveryStrategy::StateRepair => self.try_state_repair(player_id).await,
                    RecoveryStrategy::BackupRestore => self.try_backup_restore(player_id).await,
                    RecoveryStrategy::FallbackCreation => {
                        self.try_fallback_creation(player_id).await
                    }
                    RecoveryStrategy::GracefulDegradation => Err(EngineError::Internal(
                        "graceful degradation is not a pipeline strategy".to_string(),
                    )),
                }
            };
            match tokio::time::timeout(self.strategy_timeout, attempt).await {
                Ok(Ok(queue)) => {
                    info!(
                        player_id = %player_id,
                        strategy = strategy.as_str(),
                        version = queue.version,
                        "Recovery succeeded"
                    );
                    self.retry.on_success(player_id, OperationKind::Recovery);
                    self.cache_queue(&queue);
                    return Ok(RecoveryOutcome {
                        queue,
                        strategy,
                        degraded: false,
                        time_until_retry_ms: None,
                    });
                }
                Ok(Err(err)) => {
                    warn!(
                        player_id = %player_id,
                        strategy = strategy.as_str(),
                        error = %err,
                        "Recovery strategy failed; trying next"
                    );
                }
                Err(_) => {
                    warn!(
                        player_id = %player_id,
                        strategy = strategy.as_str(),
                        timeout_ms = self.strategy_timeout.as_millis() as u64,
                        "Recovery strategy timed out; trying next"
                    );
                }
            }
        }

        self.retry.on_failure(player_id, OperationKind::Recovery);
        Err(EngineError::Internal(format!(
            "all recovery strategies failed for player {}",
            player_id
        )))
    }

    /// Strategy 1: restore the newest acceptable snapshot.
    async fn try_snapshot_restore(&self, player_id: &str) -> Result<TaskQueue, EngineError> {
        let candidates = self
            .snapshots
            .list(player_id, SNAPSHOT_CANDIDATES)
            .await?;
        if candidates.is_empty() {
            return Err(EngineError::Internal(format!(
                "no snapshots for player {}",
                player_id
            )));
        }

        for candidate in candidates {
            let mut queue = match self
                .snapshots
                .restore_queue(&candidate.snapshot_id, player_id)
                .await
            {
                Ok(queue) => queue,
                Err(err) => {
                    warn!(
                        snapshot_id = %candidate.snapshot_id,
                        error = %err,
                        "Snapshot unusable; trying older one"
                    );
                    continue;
                }
            };

            // Accept valid or repairable restores.
            let report = validator::check(&queue);
            if !report.is_valid() {
                if !report.can_repair {
                    continue;
                }
                validator::repair(&mut queue, &report);
            }

            self.persistence
                .save_replacing(&mut queue, SaveOptions::restore())
                .await?;
            return Ok(queue);
        }
        Err(EngineError::Internal(format!(
            "no restorable snapshot for player {}",
            player_id
        )))
    }

    /// Strategy 2: repair the live record in place.
    async fn try_state_repair(&self, player_id: &str) -> Result<TaskQueue, EngineError> {
        let record = self
            .store
            .load_queue(player_id)
            .await?
            .ok_or_else(|| EngineError::QueueNotFound(player_id.to_string()))?;
        let mut queue = record.to_queue().map_err(EngineError::from)?;

        let report = validator::check(&queue);
        if report.is_valid() {
            return Ok(queue);
        }
        if !report.can_repair {
            return Err(EngineError::QueueUnrepairable(player_id.to_string()));
        }
        let actions = validator::repair(&mut queue, &report);
        self.persistence
            .save(&mut queue, SaveOptions::repair())
            .await?;
        info!(
            player_id = %queue.player_id,
            actions = actions.len(),
            "State repair applied"
        );
        Ok(queue)
    }

    /// Strategy 3: restore from a host-provided local backup blob.
    async fn try_backup_restore(&self, player_id: &str) -> Result<TaskQueue, EngineError> {
        let provider = self
            .backup
            .as_ref()
            .ok_or_else(|| EngineError::Internal("no backup provider wired".to_string()))?;
        let blob = provider
            .fetch_backup(player_id)
            .await?
            .ok_or_else(|| EngineError::Internal(format!("no backup for player {}", player_id)))?;

        let mut queue: TaskQueue = serde_json::from_str(&blob)
            .map_err(|e| EngineError::Internal(format!("backup blob unreadable: {}", e)))?;
        if queue.player_id != player_id {
            return Err(EngineError::Unauthorized(format!(
                "backup belongs to player {}",
                queue.player_id
            )));
        }

        let report = validator::check(&queue);
        if !report.is_valid() {
            if !report.can_repair {
                return Err(EngineError::QueueUnrepairable(player_id.to_string()));
            }
            validator::repair(&mut queue, &report);
        }
        self.persistence
            .save_replacing(&mut queue, SaveOptions::restore())
            .await?;
        Ok(queue)
    }

    /// Strategy 4: replace with a minimal valid queue at defaults.
    async fn try_fallback_creation(&self, player_id: &str) -> Result<TaskQueue, EngineError> {
        let mut queue = TaskQueue::new(player_id);
        self.persistence
            .save_replacing(&mut queue, SaveOptions::restore())
            .await?;
        warn!(player_id = %player_id, "Fallback queue created");
        Ok(queue)
    }
}
