//! Per-queue configuration and partial updates.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Configuration for one player's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on the number of queued tasks.
    pub max_queue_size: usize,
    /// Maximum duration of a single task.
    pub max_task_duration_ms: u64,
    /// Maximum summed duration of all queued tasks.
    pub max_total_queue_duration_ms: u64,
    /// Start an added task immediately when the queue is idle.
    pub auto_start: bool,
    /// Insert added tasks before lower-priority queued tasks.
    pub priority_handling: bool,
    /// Allow failed tasks to retry.
    pub retry_enabled: bool,
    /// Per-task retry cap.
    pub max_retries: u32,
    /// Validate the queue on mutation.
    pub validation_enabled: bool,
    /// Scheduler tick period.
    pub sync_interval_ms: u64,
    /// Reconcile offline gaps on load.
    pub offline_processing_enabled: bool,
    /// Auto-pause the queue when a task fails.
    pub pause_on_error: bool,
    /// Auto-resume when resource degradation clears.
    pub resume_on_resource_available: bool,
    /// Force-save cadence.
    pub persistence_interval_ms: u64,
    /// Periodic integrity validation cadence.
    pub integrity_check_interval_ms: u64,
    /// Bound on the state-history ring.
    pub max_history_size: usize,
    /// Periodic snapshot cadence.
    pub snapshot_interval_ms: u64,
    /// Snapshots retained per player.
    pub max_snapshots: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_task_duration_ms: 86_400_000,
            max_total_queue_duration_ms: 604_800_000,
            auto_start: true,
            priority_handling: false,
            retry_enabled: true,
            max_retries: 3,
            validation_enabled: true,
            sync_interval_ms: 5_000,
            offline_processing_enabled: true,
            pause_on_error: true,
            resume_on_resource_available: true,
            persistence_interval_ms: 30_000,
            integrity_check_interval_ms: 300_000,
            max_history_size: 10,
            snapshot_interval_ms: 300_000,
            max_snapshots: 10,
        }
    }
}

impl QueueConfig {
    /// Reduced-limit configuration for emergency queues returned under
    /// severe resource degradation: ten single-hour tasks, a 24 h horizon,
    /// no auto-start, no retries, no validation.
    pub fn emergency() -> Self {
        Self {
            max_queue_size: 10,
            max_task_duration_ms: 3_600_000,
            max_total_queue_duration_ms: 86_400_000,
            auto_start: false,
            retry_enabled: false,
            max_retries: 0,
            validation_enabled: false,
            ..Self::default()
        }
    }

    /// Check internal consistency. Zero bounds and inverted limits reject.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_queue_size == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_queue_size must be positive".to_string(),
            ));
        }
        if self.max_task_duration_ms == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_task_duration_ms must be positive".to_string(),
            ));
        }
        if self.max_total_queue_duration_ms < self.max_task_duration_ms {
            return Err(EngineError::ConfigInvalid(
                "max_total_queue_duration_ms must be at least max_task_duration_ms".to_string(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(EngineError::ConfigInvalid(
                "sync_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_history_size must be positive".to_string(),
            ));
        }
        if self.max_snapshots == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_snapshots must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfigUpdate {
    pub max_queue_size: Option<usize>,
    pub max_task_duration_ms: Option<u64>,
    pub max_total_queue_duration_ms: Option<u64>,
    pub auto_start: Option<bool>,
    pub priority_handling: Option<bool>,
    pub retry_enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub validation_enabled: Option<bool>,
    pub sync_interval_ms: Option<u64>,
    pub offline_processing_enabled: Option<bool>,
    pub pause_on_error: Option<bool>,
    pub resume_on_resource_available: Option<bool>,
    pub persistence_interval_ms: Option<u64>,
    pub integrity_check_interval_ms: Option<u64>,
    pub max_history_size: Option<usize>,
    pub snapshot_interval_ms: Option<u64>,
    pub max_snapshots: Option<usize>,
}

impl QueueConfigUpdate {
    /// Apply this delta to `config`, returning the merged result.
    pub fn apply(&self, config: &QueueConfig) -> QueueConfig {
        let mut merged = config.clone();
        if let Some(v) = self.max_queue_size {
            merged.max_queue_size = v;
        }
        if let Some(v) = self.max_task_duration_ms {
            merged.max_task_duration_ms = v;
        }
        if let Some(v) = self.max_total_queue_duration_ms {
            merged.max_total_queue_duration_ms = v;
        }
        if let Some(v) = self.auto_start {
            merged.auto_start = v;
        }
        if let Some(v) = self.priority_handling {
            merged.priority_handling = v;
        }
        if let Some(v) = self.retry_enabled {
            merged.retry_enabled = v;
        }
        if let Some(v) = self.max_retries {
            merged.max_retries = v;
        }
        if let Some(v) = self.validation_enabled {
            merged.validation_enabled = v;
        }
        if let Some(v) = self.sync_interval_ms {
            merged.sync_interval_ms = v;
        }
        if let Some(v) = self.offline_processing_enabled {
            merged.offline_processing_enabled = v;
        }
        if let Some(v) = self.pause_on_error {
            merged.pause_on_error = v;
        }
        if let Some(v) = self.resume_on_resource_available {
            merged.resume_on_resource_available = v;
        }
        if let Some(v) = self.persistence_interval_ms {
            merged.persistence_interval_ms = v;
        }
        if let Some(v) = self.integrity_check_interval_ms {
            merged.integrity_check_interval_ms = v;
        }
        if let Some(v) = self.max_history_size {
            merged.max_history_size = v;
        }
        if let Some(v) = self.snapshot_interval_ms {
            merged.snapshot_interval_ms = v;
        }
        if let Some(v) = self.max_snapshots {
            merged.max_snapshots = v;
        }
        merged
    }
}
