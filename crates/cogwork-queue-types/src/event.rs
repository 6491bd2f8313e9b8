//! Task-completion events appended to the log store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{TaskReward, TaskType};

/// One task-completion record, appended (never updated) when the scheduler
/// or offline reconciler finishes a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub event_id: String,
    pub player_id: String,
    pub task_id: String,
    pub task_type: TaskType,
    pub completed_at_ms: i64,
    pub duration_ms: u64,
    pub rewards: Vec<TaskReward>,
    /// True when the completion was awarded by offline reconciliation.
    pub offline: bool,
}

impl CompletionEvent {
    pub fn new(
        player_id: impl Into<String>,
        task_id: impl Into<String>,
        task_type: TaskType,
        completed_at_ms: i64,
        duration_ms: u64,
        rewards: Vec<TaskReward>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            player_id: player_id.into(),
            task_id: task_id.into(),
            task_type,
            completed_at_ms,
            duration_ms,
            rewards,
            offline: false,
        }
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }
}
