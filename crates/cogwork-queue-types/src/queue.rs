//! Per-player queue persistence model.
//!
//! One `TaskQueue` exists per player, created on first interaction and never
//! destroyed; recovery replaces its contents instead. Ownership of the
//! fields is split: the scheduler writes execution progress and totals, the
//! queue manager owns membership, and the repairer may rewrite any field.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::config::QueueConfig;
use crate::task::{Task, TaskReward};

/// Schema version newly created queues are written at.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Running totals across the queue's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueTotals {
    pub tasks_completed: i64,
    pub time_spent_ms: i64,
    pub rewards_earned: Vec<TaskReward>,
}

/// Kinds of entries in the bounded state-history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Created,
    TaskAdded,
    TaskStarted,
    TaskCompleted,
    TaskRemoved,
    Reordered,
    Cleared,
    Paused,
    Resumed,
    ConfigUpdated,
    Repaired,
    Restored,
    Migrated,
    OfflineReconciled,
}

/// One entry in the queue's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStateEvent {
    pub timestamp_ms: i64,
    pub kind: QueueEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Persistence model for one player's task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueue {
    /// Owning player (primary key).
    pub player_id: String,
    pub current_task: Option<Task>,
    pub queued_tasks: Vec<Task>,
    pub is_running: bool,
    pub is_paused: bool,
    /// Set iff `is_paused`.
    pub pause_reason: Option<String>,
    pub paused_at_ms: i64,
    pub resumed_at_ms: i64,
    pub total_pause_time_ms: i64,
    /// When false, resume requires a force flag.
    pub can_resume: bool,
    pub totals: QueueTotals,
    pub config: QueueConfig,
    pub created_at_ms: i64,
    pub last_updated_ms: i64,
    pub last_synced_ms: i64,
    pub last_validated_ms: i64,
    /// Monotonic version, incremented on every successful persisted update.
    pub version: u64,
    /// Schema version this record was written at; migrations scan on it.
    pub schema_version: u32,
    /// SHA-256 over the canonical stable subset, hex-encoded.
    pub checksum: String,
    /// Bounded state-history ring, newest last.
    pub state_history: Vec<QueueStateEvent>,
}

impl TaskQueue {
    /// Create an empty queue for a player at the default configuration.
    ///
    /// `version` starts at 0; the first persisted save takes it to 1.
    pub fn new(player_id: impl Into<String>) -> Self {
        Self::with_config(player_id, QueueConfig::default())
    }

    /// Create an empty queue with an explicit configuration.
    pub fn with_config(player_id: impl Into<String>, config: QueueConfig) -> Self {
        let now = Utc::now().timestamp_millis();
        let mut queue = Self {
            player_id: player_id.into(),
            current_task: None,
            queued_tasks: Vec::new(),
            is_running: false,
            is_paused: false,
            pause_reason: None,
            paused_at_ms: 0,
            resumed_at_ms: 0,
            total_pause_time_ms: 0,
            can_resume: true,
            totals: QueueTotals::default(),
            config,
            created_at_ms: now,
            last_updated_ms: now,
            last_synced_ms: 0,
            last_validated_ms: now,
            version: 0,
            schema_version: CURRENT_SCHEMA_VERSION,
            checksum: String::new(),
            state_history: Vec::new(),
        };
        queue.checksum = checksum::compute(&queue);
        queue.push_history(QueueEventKind::Created, None, None);
        queue
    }

    /// Recompute and assign the canonical checksum.
    pub fn refresh_checksum(&mut self) {
        self.checksum = checksum::compute(self);
    }

    /// Whether the stored checksum matches the canonical hash.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == checksum::compute(self)
    }

    /// Append a state-history entry, dropping oldest entries past the bound.
    pub fn push_history(
        &mut self,
        kind: QueueEventKind,
        task_id: Option<String>,
        detail: Option<String>,
    ) {
        self.state_history.push(QueueStateEvent {
            timestamp_ms: Utc::now().timestamp_millis(),
            kind,
            task_id,
            detail,
        });
        let bound = self.config.max_history_size.max(1);
        if self.state_history.len() > bound {
            let excess = self.state_history.len() - bound;
            self.state_history.drain(..excess);
        }
    }

    /// Ids of every task in the queue: current first (if any), then queued.
    pub fn all_task_ids(&self) -> Vec<&str> {
        self.current_task
            .iter()
            .map(|t| t.id.as_str())
            .chain(self.queued_tasks.iter().map(|t| t.id.as_str()))
            .collect()
    }

    /// Summed duration of all queued tasks (current task excluded).
    pub fn queued_duration_ms(&self) -> u64 {
        self.queued_tasks.iter().map(|t| t.duration_ms).sum()
    }

    /// Denormalized current-task id attribute; `"none"` when idle.
    pub fn current_task_id_attr(&self) -> String {
        self.current_task
            .as_ref()
            .map(|t| t.id.clone())
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Health classification for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

/// Result of a queue health inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub overall: HealthLevel,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// On-demand statistics for one player's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub player_id: String,
    pub total_tasks_completed: i64,
    pub total_time_spent_ms: i64,
    pub queued_count: usize,
    pub average_task_duration_ms: f64,
    /// completed / (completed + queued_count).
    pub completion_rate: f64,
    /// 0.6 × utilization + 0.4 × completion_rate.
    pub efficiency_score: f64,
    /// total retries / (completed + queued_count).
    pub error_rate: f64,
    pub uptime_ms: i64,
    pub computed_at_ms: i64,
}

impl QueueStatistics {
    /// Compute statistics from the queue state at `now_ms`.
    pub fn compute(queue: &TaskQueue, now_ms: i64) -> Self {
        let completed = queue.totals.tasks_completed.max(0);
        let queued_count = queue.queued_tasks.len();
        let denominator = completed as f64 + queued_count as f64;

        let completion_rate = if denominator > 0.0 {
            completed as f64 / denominator
        } else {
            0.0
        };

        let uptime_ms = (now_ms - queue.created_at_ms - queue.total_pause_time_ms).max(0);
        let utilization = if uptime_ms > 0 {
            (queue.totals.time_spent_ms.max(0) as f64 / uptime_ms as f64).min(1.0)
        } else {
            0.0
        };

        let average_task_duration_ms = if completed > 0 {
            queue.totals.time_spent_ms.max(0) as f64 / completed as f64
        } else {
            0.0
        };

        let total_retries: u32 = queue
            .current_task
            .iter()
            .chain(queue.queued_tasks.iter())
            .map(|t| t.retry_count)
            .sum();
        let error_rate = if denominator > 0.0 {
            total_retries as f64 / denominator
        } else {
            0.0
        };

        Self {
            player_id: queue.player_id.clone(),
            total_tasks_completed: completed,
            total_time_spent_ms: queue.totals.time_spent_ms.max(0),
            queued_count,
            average_task_duration_ms,
            completion_rate,
            efficiency_score: 0.6 * utilization + 0.4 * completion_rate,
            error_rate,
            uptime_ms,
            computed_at_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ActivityPayload;

    fn payload() -> ActivityPayload {
        ActivityPayload::Harvesting {
            activity_id: "copper-vein".to_string(),
            base_reward_rate: 10,
            primary_resource_id: "copper-ore".to_string(),
            rare_drop: None,
        }
    }

    #[test]
    fn test_new_queue_is_idle_and_checksummed() {
        let queue = TaskQueue::new("player-1");
        assert!(queue.current_task.is_none());
        assert!(!queue.is_running);
        assert!(!queue.is_paused);
        assert_eq!(queue.version, 0);
        assert!(queue.checksum_valid());
        assert_eq!(queue.state_history.len(), 1);
        assert_eq!(queue.state_history[0].kind, QueueEventKind::Created);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mut queue = TaskQueue::new("player-1");
        for _ in 0..30 {
            queue.push_history(QueueEventKind::TaskAdded, None, None);
        }
        assert_eq!(queue.state_history.len(), queue.config.max_history_size);
        // Newest entries survive
        assert_eq!(
            queue.state_history.last().unwrap().kind,
            QueueEventKind::TaskAdded
        );
    }

    #[test]
    fn test_checksum_tracks_membership() {
        let mut queue = TaskQueue::new("player-1");
        queue.refresh_checksum();
        let before = queue.checksum.clone();
        queue
            .queued_tasks
            .push(Task::new("player-1", "Mine", 10_000, payload()));
        assert!(!queue.checksum_valid());
        queue.refresh_checksum();
        assert_ne!(queue.checksum, before);
        assert!(queue.checksum_valid());
    }

    #[test]
    fn test_statistics_formulas() {
        let mut queue = TaskQueue::new("player-1");
        queue.created_at_ms = 0;
        queue.totals.tasks_completed = 3;
        queue.totals.time_spent_ms = 60_000;
        queue
            .queued_tasks
            .push(Task::new("player-1", "Mine", 10_000, payload()));

        // now = 120s, no pause time: utilization = 0.5, completion = 3/4
        let stats = QueueStatistics::compute(&queue, 120_000);
        assert_eq!(stats.queued_count, 1);
        assert!((stats.completion_rate - 0.75).abs() < 1e-9);
        assert!((stats.efficiency_score - (0.6 * 0.5 + 0.4 * 0.75)).abs() < 1e-9);
        assert!((stats.average_task_duration_ms - 20_000.0).abs() < 1e-9);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[test]
    fn test_statistics_exclude_pause_time_from_uptime() {
        let mut queue = TaskQueue::new("player-1");
        queue.created_at_ms = 0;
        queue.total_pause_time_ms = 60_000;
        queue.totals.time_spent_ms = 30_000;
        let stats = QueueStatistics::compute(&queue, 120_000);
        assert_eq!(stats.uptime_ms, 60_000);
    }

    #[test]
    fn test_statistics_empty_queue() {
        let queue = TaskQueue::new("player-1");
        let stats = QueueStatistics::compute(&queue, Utc::now().timestamp_millis());
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.average_task_duration_ms, 0.0);
    }

    #[test]
    fn test_current_task_id_attr_sentinel() {
        let mut queue = TaskQueue::new("player-1");
        assert_eq!(queue.current_task_id_attr(), "none");
        let task = Task::new("player-1", "Mine", 10_000, payload());
        let id = task.id.clone();
        queue.current_task = Some(task);
        assert_eq!(queue.current_task_id_attr(), id);
    }
}
