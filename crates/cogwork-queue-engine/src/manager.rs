//! Per-player queue lifecycle operations.
//!
//! Every mutating operation runs through the persistence layer's atomic
//! update: load → mutate in memory → conditional save on `version`, with
//! conflict replay. The manager owns queue membership; it never touches
//! execution progress (the scheduler's job) beyond starting a task under
//! auto-start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cogwork_queue_storage::{OpContext, PersistenceStore, SaveOptions};
use cogwork_queue_types::{
    EngineError, HealthLevel, QueueConfigUpdate, QueueEventKind, QueueHealth, QueueStatistics,
    Task, TaskQueue,
};

use crate::resource::{DegradationLevel, ResourceMonitor};

/// Statistics cache TTL; extended under degradation.
const STATS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Per-player queue operations.
pub struct QueueManager {
    persistence: Arc<PersistenceStore>,
    monitor: Arc<ResourceMonitor>,
    stats_cache: Mutex<HashMap<String, (QueueStatistics, Instant)>>,
}

impl QueueManager {
    pub fn new(persistence: Arc<PersistenceStore>, monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            persistence,
            monitor,
            stats_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Add a task to a player's queue, enforcing validation, capacity, and
    /// business rules. Under priority handling the task is inserted before
    /// the first queued task with strictly lower priority; the current task
    /// is never preempted. Under auto-start an idle, unpaused queue starts
    /// the task immediately.
    pub async fn add_task(
        &self,
        player_id: &str,
        task: Task,
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        if self.monitor.level() == DegradationLevel::Severe {
            warn!(player_id = %player_id, "Refusing task addition under severe degradation");
            return Err(EngineError::SystemOverloaded);
        }

        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                // Structural validation. Zero duration always rejects;
                // deeper checks only when the queue opts in.
                if task.duration_ms == 0 {
                    return Err(EngineError::InvalidTask(
                        "duration must be positive".to_string(),
                    ));
                }
                if q.config.validation_enabled {
                    let issues = task.validation_issues();
                    if !issues.is_empty() {
                        return Err(EngineError::InvalidTask(issues.join("; ")));
                    }
                }

                if task.duration_ms > q.config.max_task_duration_ms {
                    return Err(EngineError::TaskTooLong {
                        duration_ms: task.duration_ms,
                        max_ms: q.config.max_task_duration_ms,
                    });
                }
                if q.queued_tasks.len() >= q.config.max_queue_size {
                    return Err(EngineError::QueueFull {
                        size: q.queued_tasks.len(),
                        max: q.config.max_queue_size,
                    });
                }
                let projected = q.queued_duration_ms() + task.duration_ms;
                if projected > q.config.max_total_queue_duration_ms {
                    return Err(EngineError::TotalDurationExceeded {
                        total_ms: projected,
                        max_ms: q.config.max_total_queue_duration_ms,
                    });
                }

                if let Some(prerequisite) = task.unmet_prerequisite() {
                    return Err(EngineError::PrerequisiteNotMet(prerequisite.name.clone()));
                }
                if let Some(requirement) = task.insufficient_resource() {
                    return Err(EngineError::InsufficientResources(
                        requirement.resource_id.clone(),
                    ));
                }

                let now = Utc::now().timestamp_millis();
                let mut task = task.clone();
                task.estimated_completion_ms =
                    now + q.queued_duration_ms() as i64 + task.duration_ms as i64;

                if q.config.auto_start && q.current_task.is_none() && !q.is_paused {
                    task.start_time_ms = now;
                    q.push_history(QueueEventKind::TaskStarted, Some(task.id.clone()), None);
                    q.current_task = Some(task);
                    q.is_running = true;
                } else {
                    q.push_history(QueueEventKind::TaskAdded, Some(task.id.clone()), None);
                    if q.config.priority_handling {
                        let position = q
                            .queued_tasks
                            .iter()
                            .position(|queued| queued.priority < task.priority)
                            .unwrap_or(q.queued_tasks.len());
                        q.queued_tasks.insert(position, task);
                    } else {
                        q.queued_tasks.push(task);
                    }
                }
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        debug!(player_id = %player_id, version = queue.version, "Task added");
        Ok(queue)
    }

    /// Remove a task by id. Removing the current task advances the queue;
    /// its partial progress is discarded. Unknown ids are a no-op.
    pub async fn remove_task(
        &self,
        player_id: &str,
        task_id: &str,
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        let task_id = task_id.to_string();
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                let was_current = q
                    .current_task
                    .as_ref()
                    .is_some_and(|current| current.id == task_id);

                if was_current {
                    let now = Utc::now().timestamp_millis();
                    q.push_history(QueueEventKind::TaskRemoved, Some(task_id.clone()), None);
                    if q.queued_tasks.is_empty() {
                        q.current_task = None;
                        q.is_running = false;
                    } else {
                        let mut next = q.queued_tasks.remove(0);
                        if !q.is_paused {
                            next.start_time_ms = now;
                        }
                        q.push_history(
                            QueueEventKind::TaskStarted,
                            Some(next.id.clone()),
                            None,
                        );
                        q.current_task = Some(next);
                        q.is_running = !q.is_paused;
                    }
                } else {
                    let before = q.queued_tasks.len();
                    q.queued_tasks.retain(|t| t.id != task_id);
                    if q.queued_tasks.len() != before {
                        q.push_history(
                            QueueEventKind::TaskRemoved,
                            Some(task_id.clone()),
                            None,
                        );
                    }
                }
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        Ok(queue)
    }

    /// Reorder the waiting tasks to match `desired` as a prefix. Unknown
    /// ids are silently ignored; unreferenced tasks keep their relative
    /// order at the tail. The current task is unaffected.
    pub async fn reorder(
        &self,
        player_id: &str,
        desired: &[String],
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        let desired = desired.to_vec();
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                let mut remaining = std::mem::take(&mut q.queued_tasks);
                let mut reordered = Vec::with_capacity(remaining.len());
                for id in &desired {
                    if let Some(position) = remaining.iter().position(|t| &t.id == id) {
                        reordered.push(remaining.remove(position));
                    }
                }
                reordered.extend(remaining);
                q.queued_tasks = reordered;
                q.push_history(QueueEventKind::Reordered, None, None);
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        Ok(queue)
    }

    /// Empty the queue and reset the running/paused state.
    pub async fn clear(&self, player_id: &str, ctx: &OpContext) -> Result<TaskQueue, EngineError> {
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                q.queued_tasks.clear();
                q.current_task = None;
                q.is_running = false;
                q.is_paused = false;
                q.pause_reason = None;
                q.can_resume = true;
                q.push_history(QueueEventKind::Cleared, None, None);
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        info!(player_id = %player_id, "Queue cleared");
        Ok(queue)
    }

    /// Pause the queue. Pausing an already-paused queue is a warning, not
    /// an error. With `allow_resume = false` only a forced resume may
    /// restart it.
    pub async fn pause(
        &self,
        player_id: &str,
        reason: &str,
        allow_resume: bool,
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        let reason = reason.to_string();
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                if q.is_paused {
                    warn!(player_id = %q.player_id, "Queue is already paused");
                    return Ok(());
                }
                q.is_paused = true;
                q.pause_reason = Some(reason.clone());
                q.paused_at_ms = Utc::now().timestamp_millis();
                q.can_resume = allow_resume;
                q.is_running = false;
                q.push_history(QueueEventKind::Paused, None, Some(reason.clone()));
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        Ok(queue)
    }

    /// Resume a paused queue. Fails with `BUS_NOT_PAUSED` when not paused
    /// and `BUS_RESUME_FORBIDDEN` when the pause disallowed resuming,
    /// unless forced. The pause gap shifts the current task's start time so
    /// no progress accrues for paused wall-clock.
    pub async fn resume(
        &self,
        player_id: &str,
        force: bool,
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                if !q.is_paused {
                    return Err(EngineError::NotPaused);
                }
                if !q.can_resume && !force {
                    return Err(EngineError::ResumeForbidden);
                }

                let now = Utc::now().timestamp_millis();
                let pause_span = (now - q.paused_at_ms).max(0);
                q.total_pause_time_ms += pause_span;
                q.resumed_at_ms = now;
                q.is_paused = false;
                q.pause_reason = None;
                q.can_resume = true;

                if let Some(current) = q.current_task.as_mut() {
                    if current.start_time_ms > 0 {
                        current.start_time_ms += pause_span;
                    } else {
                        current.start_time_ms = now;
                    }
                    q.is_running = true;
                }
                q.push_history(QueueEventKind::Resumed, None, None);
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        Ok(queue)
    }

    /// Apply a partial configuration update. Shrinking `max_queue_size`
    /// below the current length truncates the tail.
    pub async fn update_config(
        &self,
        player_id: &str,
        delta: QueueConfigUpdate,
        ctx: &OpContext,
    ) -> Result<TaskQueue, EngineError> {
        let queue = self
            .persistence
            .atomic_update(player_id, ctx, SaveOptions::default(), |q| {
                let merged = delta.apply(&q.config);
                merged.validate()?;
                if q.queued_tasks.len() > merged.max_queue_size {
                    q.queued_tasks.truncate(merged.max_queue_size);
                }
                q.config = merged;
                q.push_history(QueueEventKind::ConfigUpdated, None, None);
                Ok(())
            })
            .await?;

        self.invalidate_stats(player_id);
        Ok(queue)
    }

    /// On-demand statistics, cached for sixty seconds per player (longer
    /// under degradation). The cache is invalidated on every successful
    /// mutation for the player.
    pub async fn statistics(&self, player_id: &str) -> Result<QueueStatistics, EngineError> {
        let ttl = match self.monitor.level() {
            DegradationLevel::Severe => STATS_CACHE_TTL * 5,
            _ => STATS_CACHE_TTL,
        };
        if let Some((stats, cached_at)) = self.stats_cache.lock().get(player_id) {
            if cached_at.elapsed() < ttl {
                return Ok(stats.clone());
            }
        }

        let queue = self.persistence.load_or_create(player_id).await?;
        let stats = QueueStatistics::compute(&queue, Utc::now().timestamp_millis());
        self.stats_cache
            .lock()
            .insert(player_id.to_string(), (stats.clone(), Instant::now()));
        Ok(stats)
    }

    /// Inspect queue health: integrity findings plus operational symptoms,
    /// with recommendations.
    pub async fn health(&self, player_id: &str) -> Result<QueueHealth, EngineError> {
        let queue = match self.persistence.load(player_id).await {
            Ok(Some(queue)) => queue,
            Ok(None) => {
                return Ok(QueueHealth {
                    overall: HealthLevel::Healthy,
                    issues: Vec::new(),
                    recommendations: Vec::new(),
                });
            }
            Err(EngineError::QueueUnrepairable(_)) => {
                return Ok(QueueHealth {
                    overall: HealthLevel::Critical,
                    issues: vec!["queue is corrupted beyond automatic repair".to_string()],
                    recommendations: vec!["run recovery for this player".to_string()],
                });
            }
            Err(err) => return Err(err),
        };

        let report = cogwork_queue_storage::validator::check(&queue);
        let stats = QueueStatistics::compute(&queue, Utc::now().timestamp_millis());

        let mut issues: Vec<String> =
            report.issues.iter().map(|i| i.message.clone()).collect();
        let mut recommendations = Vec::new();

        if queue.is_paused && !queue.can_resume {
            issues.push("queue is paused and cannot resume without force".to_string());
            recommendations.push("resolve the pause reason, then force-resume".to_string());
        }
        if stats.error_rate > 0.5 {
            issues.push(format!("high retry rate: {:.2}", stats.error_rate));
            recommendations.push("check task requirements before queuing".to_string());
        }
        if queue.queued_tasks.len() >= queue.config.max_queue_size {
            issues.push("queue is at capacity".to_string());
            recommendations.push("complete or remove queued tasks".to_string());
        }
        if !report.is_valid() {
            recommendations.push("reload to trigger automatic repair".to_string());
        }

        let overall = if report.has_critical() || report.integrity_score < 50 {
            HealthLevel::Critical
        } else if !issues.is_empty() {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        };

        Ok(QueueHealth {
            overall,
            issues,
            recommendations,
        })
    }

    /// Drop the cached statistics for a player.
    pub fn invalidate_stats(&self, player_id: &str) {
        self.stats_cache.lock().remove(player_id);
    }
}
