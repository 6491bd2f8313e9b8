//! Offline-progress reconciliation.
//!
//! When a queue is loaded after a gap, elapsed wall-clock minutes (capped
//! at 24 hours) are awarded through the same advancement path the online
//! scheduler uses, so reconciling a gap and ticking through it produce the
//! same totals up to rounding.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use cogwork_queue_storage::{OpContext, PersistenceStore, QueueStore, SaveOptions};
use cogwork_queue_types::{
    EngineError, PlayerStatsProvider, QueueEventKind, RewardCalculator, TaskReward,
};

use crate::advance::advance_queue;
use crate::retry::{OperationKind, RetryController};

/// Offline gaps clamp to 24 hours of progress.
pub const MAX_OFFLINE_MINUTES: u64 = 1_440;

/// What a reconciliation pass awarded.
#[derive(Debug, Clone, Default)]
pub struct OfflineProgress {
    /// Whole minutes between `last_updated` and now, before the cap.
    pub elapsed_minutes: u64,
    /// True when the gap exceeded the 24-hour cap.
    pub capped: bool,
    /// Minutes actually pushed through the rewards callback.
    pub minutes_awarded: u64,
    pub tasks_completed: u64,
    /// Rewards granted by this pass, in grant order.
    pub rewards: Vec<TaskReward>,
    /// `last_updated` after the pass.
    pub reconciled_to_ms: i64,
}

/// Awards deterministic progress for elapsed wall-clock time.
pub struct OfflineReconciler {
    persistence: Arc<PersistenceStore>,
    store: Arc<dyn QueueStore>,
    calculator: Arc<dyn RewardCalculator>,
    stats_provider: Arc<dyn PlayerStatsProvider>,
    retry: Arc<RetryController>,
}

impl OfflineReconciler {
    pub fn new(
        persistence: Arc<PersistenceStore>,
        store: Arc<dyn QueueStore>,
        calculator: Arc<dyn RewardCalculator>,
        stats_provider: Arc<dyn PlayerStatsProvider>,
        retry: Arc<RetryController>,
    ) -> Self {
        Self {
            persistence,
            store,
            calculator,
            stats_provider,
            retry,
        }
    }

    /// Reconcile a player's queue up to the current wall clock.
    pub async fn reconcile(
        &self,
        player_id: &str,
        ctx: &OpContext,
    ) -> Result<OfflineProgress, EngineError> {
        self.reconcile_at(player_id, Utc::now().timestamp_millis(), ctx)
            .await
    }

    /// Reconcile up to an explicit instant (`t₁`). Gaps under one minute
    /// award nothing; longer gaps advance the queue to
    /// `last_updated + min(minutes, 1440)` and stamp `last_updated = t₁`.
    pub async fn reconcile_at(
        &self,
        player_id: &str,
        now_ms: i64,
        ctx: &OpContext,
    ) -> Result<OfflineProgress, EngineError> {
        self.retry.guard(player_id, OperationKind::Reconcile)?;
        let stats = self.stats_provider.stats(player_id).await?;

        let result = loop {
            ctx.check("offline reconciliation")?;

            let Some(mut queue) = self.persistence.load(player_id).await? else {
                break Ok(OfflineProgress::default());
            };

            let elapsed_minutes = ((now_ms - queue.last_updated_ms) / 60_000).max(0) as u64;
            if elapsed_minutes < 1 {
                debug!(player_id = %player_id, "No whole minute elapsed; nothing to reconcile");
                break Ok(OfflineProgress {
                    reconciled_to_ms: queue.last_updated_ms,
                    ..OfflineProgress::default()
                });
            }

            let capped = elapsed_minutes > MAX_OFFLINE_MINUTES;
            let effective_minutes = elapsed_minutes.min(MAX_OFFLINE_MINUTES);
            let horizon_ms = queue.last_updated_ms + (effective_minutes * 60_000) as i64;

            let rewards_before = queue.totals.rewards_earned.len();
            let outcome =
                advance_queue(&mut queue, horizon_ms, self.calculator.as_ref(), &stats).await?;
            queue.push_history(
                QueueEventKind::OfflineReconciled,
                None,
                Some(format!("{} minutes", effective_minutes)),
            );

            match self.persistence.save(&mut queue, SaveOptions::default()).await {
                Ok(()) => {
                    for event in outcome.completed.iter().cloned() {
                        self.store.append_event(event.offline()).await?;
                    }
                    break Ok(OfflineProgress {
                        elapsed_minutes,
                        capped,
                        minutes_awarded: outcome.minutes_awarded,
                        tasks_completed: outcome.completed.len() as u64,
                        rewards: queue.totals.rewards_earned[rewards_before..].to_vec(),
                        reconciled_to_ms: queue.last_updated_ms,
                    });
                }
                Err(EngineError::VersionConflict(_)) => continue,
                Err(err) => break Err(err),
            }
        };

        match &result {
            Ok(progress) => {
                self.retry.on_success(player_id, OperationKind::Reconcile);
                if progress.minutes_awarded > 0 {
                    info!(
                        player_id = %player_id,
                        minutes = progress.minutes_awarded,
                        capped = progress.capped,
                        tasks_completed = progress.tasks_completed,
                        "Reconciled offline progress"
                    );
                }
            }
            Err(_) => self.retry.on_failure(player_id, OperationKind::Reconcile),
        }
        result
    }
}
