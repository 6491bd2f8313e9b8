//! The continuously-running engine that advances every active queue.
//!
//! One scheduler is shared across players. Each pass queries the
//! denormalized active index, advances each queue to the current instant,
//! and persists with the optimistic-concurrency save; version conflicts
//! reload and retry. Per-player failures feed the circuit breakers and
//! never kill the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cogwork_queue_storage::{
    OpContext, PersistenceStore, QueueStore, SaveOptions, SnapshotReason, SnapshotStore,
};
use cogwork_queue_types::{
    EngineError, PlayerStatsProvider, QueueEventKind, RewardCalculator, TaskQueue,
};

use crate::advance::advance_queue;
use crate::resource::{DegradationLevel, ResourceMonitor};
use crate::retry::{OperationKind, RetryController};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pass period.
    pub tick_interval: Duration,
    /// Queues processed per pass.
    pub batch_limit: u32,
    /// Version-conflict retries within one tick of one player.
    pub max_conflict_retries: u32,
    /// Periodic snapshot cadence per player; stretched under degradation.
    pub snapshot_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            batch_limit: 100,
            max_conflict_retries: 3,
            snapshot_interval: Duration::from_secs(300),
        }
    }
}

/// Shared scheduling engine.
pub struct Scheduler {
    persistence: Arc<PersistenceStore>,
    store: Arc<dyn QueueStore>,
    snapshots: Arc<SnapshotStore>,
    calculator: Arc<dyn RewardCalculator>,
    stats_provider: Arc<dyn PlayerStatsProvider>,
    retry: Arc<RetryController>,
    monitor: Arc<ResourceMonitor>,
    config: SchedulerConfig,
    last_snapshot: Mutex<HashMap<String, Instant>>,
    last_level: Mutex<DegradationLevel>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Arc<PersistenceStore>,
        store: Arc<dyn QueueStore>,
        snapshots: Arc<SnapshotStore>,
        calculator: Arc<dyn RewardCalculator>,
        stats_provider: Arc<dyn PlayerStatsProvider>,
        retry: Arc<RetryController>,
        monitor: Arc<ResourceMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            persistence,
            store,
            snapshots,
            calculator,
            stats_provider,
            retry,
            monitor,
            config,
            last_snapshot: Mutex::new(HashMap::new()),
            last_level: Mutex::new(DegradationLevel::None),
        }
    }

    /// Advance one player's queue to the current wall clock.
    pub async fn tick_player(&self, player_id: &str) -> Result<Option<TaskQueue>, EngineError> {
        self.tick_player_at(player_id, Utc::now().timestamp_millis())
            .await
    }

    /// Advance one player's queue to an explicit instant. The split from
    /// [`Self::tick_player`] keeps clock-sensitive behavior testable.
    pub async fn tick_player_at(
        &self,
        player_id: &str,
        now_ms: i64,
    ) -> Result<Option<TaskQueue>, EngineError> {
        let stats = self.stats_provider.stats(player_id).await?;

        let mut attempt = 0u32;
        loop {
            let Some(mut queue) = self.persistence.load(player_id).await? else {
                return Ok(None);
            };

            let outcome = match advance_queue(
                &mut queue,
                now_ms,
                self.calculator.as_ref(),
                &stats,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.handle_task_failure(&mut queue, &err);
                    self.persistence
                        .save(&mut queue, SaveOptions::default())
                        .await?;
                    return Ok(Some(queue));
                }
            };
            if !outcome.changed {
                return Ok(Some(queue));
            }

            match self.persistence.save(&mut queue, SaveOptions::default()).await {
                Ok(()) => {
                    // Events land after the save wins; at-least-once is the
                    // contract for the append log.
                    for event in outcome.completed {
                        self.store.append_event(event).await?;
                    }
                    self.maybe_snapshot(&queue).await;
                    return Ok(Some(queue));
                }
                Err(EngineError::VersionConflict(_)) => {
                    attempt += 1;
                    if attempt > self.config.max_conflict_retries {
                        return Err(EngineError::RetriesExhausted(attempt));
                    }
                    debug!(
                        player_id = %player_id,
                        attempt,
                        "Tick lost a version race; reloading"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// A task whose execution failed (rewards callback error) consumes one
    /// retry; past its retry budget the queue either auto-pauses
    /// (`pause_on_error`) or drops the task and moves on.
    fn handle_task_failure(&self, queue: &mut TaskQueue, err: &EngineError) {
        let now = Utc::now().timestamp_millis();
        let Some(current) = queue.current_task.as_mut() else {
            return;
        };
        current.retry_count += 1;
        let budget = current.max_retries.min(queue.config.max_retries);

        if queue.config.retry_enabled && current.retry_count <= budget {
            warn!(
                player_id = %queue.player_id,
                task_id = %current.id,
                retry = current.retry_count,
                error = %err,
                "Task failed; will retry"
            );
            return;
        }

        let failed_id = current.id.clone();
        if queue.config.pause_on_error {
            queue.is_paused = true;
            queue.pause_reason = Some(format!("Task failed: {}", err));
            queue.paused_at_ms = now;
            queue.can_resume = true;
            queue.is_running = false;
            queue.push_history(
                QueueEventKind::Paused,
                Some(failed_id),
                Some(err.code().to_string()),
            );
        } else {
            queue.push_history(
                QueueEventKind::TaskRemoved,
                Some(failed_id),
                Some(err.code().to_string()),
            );
            if queue.queued_tasks.is_empty() {
                queue.current_task = None;
                queue.is_running = false;
            } else {
                let mut next = queue.queued_tasks.remove(0);
                next.start_time_ms = now;
                queue.current_task = Some(next);
            }
        }
    }

    /// Resume queues that were auto-paused by overload, once headroom
    /// returns. Walks the player set, so it only runs on the
    /// severe-to-clear transition.
    async fn resume_overload_paused(&self) {
        let players = match self.store.list_players().await {
            Ok(players) => players,
            Err(err) => {
                warn!(error = %err, "Player scan for overload resume failed");
                return;
            }
        };
        for player_id in players {
            let result = self
                .persistence
                .atomic_update(
                    &player_id,
                    &OpContext::unbounded(),
                    SaveOptions::default(),
                    |q| {
                        let overload_pause = q.is_paused
                            && q.config.resume_on_resource_available
                            && q.pause_reason.as_deref() == Some("System overload");
                        if !overload_pause {
                            return Ok(());
                        }
                        let now = Utc::now().timestamp_millis();
                        let span = (now - q.paused_at_ms).max(0);
                        q.total_pause_time_ms += span;
                        q.resumed_at_ms = now;
                        q.is_paused = false;
                        q.pause_reason = None;
                        q.can_resume = true;
                        if let Some(current) = q.current_task.as_mut() {
                            if current.start_time_ms > 0 {
                                current.start_time_ms += span;
                            } else {
                                current.start_time_ms = now;
                            }
                            q.is_running = true;
                        }
                        q.push_history(
                            QueueEventKind::Resumed,
                            None,
                            Some("resource pressure cleared".to_string()),
                        );
                        Ok(())
                    },
                )
                .await;
            if let Err(err) = result {
                warn!(player_id = %player_id, error = %err, "Overload resume failed");
            }
        }
    }

    /// Periodic snapshot, with the cadence stretched fourfold under severe
    /// degradation.
    async fn maybe_snapshot(&self, queue: &TaskQueue) {
        let interval = match self.monitor.level() {
            DegradationLevel::Severe => self.config.snapshot_interval * 4,
            _ => self.config.snapshot_interval,
        };
        let due = {
            let last = self.last_snapshot.lock();
            last.get(&queue.player_id)
                .is_none_or(|at| at.elapsed() >= interval)
        };
        if !due {
            return;
        }
        match self.snapshots.snapshot(queue, SnapshotReason::Periodic).await {
            Ok(_) => {
                self.last_snapshot
                    .lock()
                    .insert(queue.player_id.clone(), Instant::now());
            }
            Err(err) => {
                warn!(
                    player_id = %queue.player_id,
                    error = %err,
                    "Periodic snapshot failed"
                );
            }
        }
    }

    /// One full pass over the active queues.
    pub async fn pass(&self) {
        // Auto-resume overload pauses when severe pressure clears.
        let level = self.monitor.level();
        let previous = std::mem::replace(&mut *self.last_level.lock(), level);
        if previous == DegradationLevel::Severe && level < DegradationLevel::Moderate {
            info!("Severe degradation cleared; resuming overload-paused queues");
            self.resume_overload_paused().await;
        }

        let players = match self.store.query_active_queues(self.config.batch_limit).await {
            Ok(players) => players,
            Err(err) => {
                warn!(error = %err, "Active-queue query failed; skipping pass");
                return;
            }
        };

        for player_id in players {
            if self
                .retry
                .guard(&player_id, OperationKind::Save)
                .is_err()
            {
                debug!(player_id = %player_id, "Skipping tick; circuit open");
                continue;
            }
            match self.tick_player(&player_id).await {
                Ok(_) => self.retry.on_success(&player_id, OperationKind::Save),
                Err(err) => {
                    self.retry.on_failure(&player_id, OperationKind::Save);
                    warn!(player_id = %player_id, error = %err, "Tick failed");
                }
            }
        }

        if let Err(err) = self.store.maintenance().await {
            warn!(error = %err, "Store maintenance failed");
        }
    }

    /// Run passes until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.pass().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogwork_queue_storage::{InMemoryQueueStore, OpContext};
    use cogwork_queue_types::{
        ActivityPayload, DefaultStatsProvider, RewardKind, StandardRewardCalculator, Task,
    };

    use crate::manager::QueueManager;
    use crate::resource::ManualProbe;

    fn payload() -> ActivityPayload {
        ActivityPayload::Harvesting {
            activity_id: "copper-vein".to_string(),
            base_reward_rate: 10,
            primary_resource_id: "copper-ore".to_string(),
            rare_drop: None,
        }
    }

    struct Fixture {
        manager: QueueManager,
        scheduler: Scheduler,
        persistence: Arc<PersistenceStore>,
        store: Arc<dyn QueueStore>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
        let persistence = Arc::new(PersistenceStore::new(Arc::clone(&store)));
        let snapshots = Arc::new(SnapshotStore::new(Arc::clone(&store)));
        let monitor = Arc::new(ResourceMonitor::new(Arc::new(ManualProbe::default())));
        let retry = Arc::new(RetryController::default());
        let scheduler = Scheduler::new(
            Arc::clone(&persistence),
            Arc::clone(&store),
            snapshots,
            Arc::new(StandardRewardCalculator),
            Arc::new(DefaultStatsProvider),
            retry,
            Arc::clone(&monitor),
            SchedulerConfig::default(),
        );
        Fixture {
            manager: QueueManager::new(Arc::clone(&persistence), monitor),
            scheduler,
            persistence,
            store,
        }
    }

    #[tokio::test]
    async fn test_tick_progresses_and_completes() {
        let f = fixture();
        let ctx = OpContext::unbounded();
        let queue = f
            .manager
            .add_task(
                "player-1",
                Task::new("player-1", "Mine", 30_000, payload()),
                &ctx,
            )
            .await
            .unwrap();
        let started_at = queue.current_task.as_ref().unwrap().start_time_ms;

        // Halfway through
        let queue = f
            .scheduler
            .tick_player_at("player-1", started_at + 15_000)
            .await
            .unwrap()
            .unwrap();
        let progress = queue.current_task.as_ref().unwrap().progress;
        assert!((progress - 0.5).abs() < 0.01);
        assert!(queue.is_running);

        // Past the end: completed, queue idles
        let queue = f
            .scheduler
            .tick_player_at("player-1", started_at + 30_000)
            .await
            .unwrap()
            .unwrap();
        assert!(queue.current_task.is_none());
        assert!(!queue.is_running);
        assert_eq!(queue.totals.tasks_completed, 1);

        // Completion event reached the log
        let events = f.store.list_events("player-1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(
            events[0]
                .rewards
                .iter()
                .any(|r| r.kind == RewardKind::Experience)
        );
    }

    #[tokio::test]
    async fn test_tick_advances_to_next_queued_task() {
        let f = fixture();
        let ctx = OpContext::unbounded();
        let queue = f
            .manager
            .add_task(
                "player-1",
                Task::new("player-1", "First", 30_000, payload()),
                &ctx,
            )
            .await
            .unwrap();
        let started_at = queue.current_task.as_ref().unwrap().start_time_ms;
        f.manager
            .add_task(
                "player-1",
                Task::new("player-1", "Second", 30_000, payload()),
                &ctx,
            )
            .await
            .unwrap();

        let queue = f
            .scheduler
            .tick_player_at("player-1", started_at + 31_000)
            .await
            .unwrap()
            .unwrap();
        let current = queue.current_task.as_ref().unwrap();
        assert_eq!(current.name, "Second");
        // Second started at First's completion boundary
        assert_eq!(current.start_time_ms, started_at + 30_000);
        assert!(queue.is_running);
        assert_eq!(queue.totals.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_tick_of_unknown_player_is_none() {
        let f = fixture();
        assert!(f.scheduler.tick_player("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idle_queue_tick_changes_nothing() {
        let f = fixture();
        let mut queue = cogwork_queue_types::TaskQueue::new("player-1");
        f.persistence
            .save(&mut queue, SaveOptions::default())
            .await
            .unwrap();

        let after = f
            .scheduler
            .tick_player_at("player-1", Utc::now().timestamp_millis() + 60_000)
            .await
            .unwrap()
            .unwrap();
        // No save happened: version unchanged
        assert_eq!(after.version, 1);
    }

    #[tokio::test]
    async fn test_pass_skips_open_circuits() {
        let f = fixture();
        let ctx = OpContext::unbounded();
        f.manager
            .add_task(
                "player-1",
                Task::new("player-1", "Mine", 600_000, payload()),
                &ctx,
            )
            .await
            .unwrap();

        for _ in 0..5 {
            f.scheduler.retry.on_failure("player-1", OperationKind::Save);
        }
        // The pass completes without touching the protected queue
        f.scheduler.pass().await;
        let queue = f.persistence.load("player-1").await.unwrap().unwrap();
        assert_eq!(queue.version, 1);
    }
}
