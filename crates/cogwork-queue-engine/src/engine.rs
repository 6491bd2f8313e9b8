//! The root engine value.
//!
//! One `Engine` owns every component (storage, persistence, manager,
//! scheduler, retry, recovery, monitor, reconciler), wired at construction
//! by [`EngineBuilder`]. There are no module-level singletons; a process
//! holds exactly one `Engine` and passes references down.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cogwork_queue_storage::{
    InMemoryQueueStore, MigrationStore, OpContext, PersistenceStore, QueueStore, SnapshotStore,
};
use cogwork_queue_types::{
    DefaultStatsProvider, EngineError, PlayerStatsProvider, RewardCalculator,
    StandardRewardCalculator, TaskQueue,
};

use crate::manager::QueueManager;
use crate::offline::{OfflineProgress, OfflineReconciler};
use crate::recovery::{BackupProvider, RecoveryOrchestrator, RecoveryOutcome};
use crate::resource::{ManualProbe, ResourceMonitor, ResourceProbe};
use crate::retry::{RetryController, RetryPolicy};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// Builder for a fully wired [`Engine`].
pub struct EngineBuilder {
    store: Option<Arc<dyn QueueStore>>,
    calculator: Arc<dyn RewardCalculator>,
    stats_provider: Arc<dyn PlayerStatsProvider>,
    probe: Arc<dyn ResourceProbe>,
    backup: Option<Arc<dyn BackupProvider>>,
    retry_policy: RetryPolicy,
    scheduler_config: SchedulerConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            store: None,
            calculator: Arc::new(StandardRewardCalculator),
            stats_provider: Arc::new(DefaultStatsProvider),
            probe: Arc::new(ManualProbe::default()),
            backup: None,
            retry_policy: RetryPolicy::default(),
            scheduler_config: SchedulerConfig::default(),
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage backend. Defaults to a fresh in-memory store.
    pub fn storage(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Domain rewards callback.
    pub fn reward_calculator(mut self, calculator: Arc<dyn RewardCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    /// Domain stats lookup.
    pub fn stats_provider(mut self, provider: Arc<dyn PlayerStatsProvider>) -> Self {
        self.stats_provider = provider;
        self
    }

    /// Resource probe for degradation levels.
    pub fn resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Host backup source for the recovery pipeline.
    pub fn backup_provider(mut self, backup: Arc<dyn BackupProvider>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn build(self) -> Engine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryQueueStore::new()));
        let persistence = Arc::new(PersistenceStore::new(Arc::clone(&store)));
        let snapshots = Arc::new(SnapshotStore::new(Arc::clone(&store)));
        let retry = Arc::new(RetryController::new(self.retry_policy));
        let monitor = Arc::new(ResourceMonitor::new(self.probe));
        let manager = Arc::new(QueueManager::new(
            Arc::clone(&persistence),
            Arc::clone(&monitor),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&persistence),
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&self.calculator),
            Arc::clone(&self.stats_provider),
            Arc::clone(&retry),
            Arc::clone(&monitor),
            self.scheduler_config,
        ));
        let reconciler = Arc::new(OfflineReconciler::new(
            Arc::clone(&persistence),
            Arc::clone(&store),
            Arc::clone(&self.calculator),
            Arc::clone(&self.stats_provider),
            Arc::clone(&retry),
        ));
        let mut recovery = RecoveryOrchestrator::new(
            Arc::clone(&persistence),
            Arc::clone(&store),
            Arc::clone(&snapshots),
            Arc::clone(&retry),
            Arc::clone(&monitor),
        );
        if let Some(backup) = self.backup {
            recovery = recovery.with_backup_provider(backup);
        }
        let migrations = MigrationStore::new(Arc::clone(&store), Arc::clone(&persistence));

        Engine {
            store,
            persistence,
            snapshots,
            retry,
            monitor,
            manager,
            scheduler,
            reconciler,
            recovery: Arc::new(recovery),
            migrations: Arc::new(Mutex::new(migrations)),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }
}

/// The per-process engine root.
pub struct Engine {
    store: Arc<dyn QueueStore>,
    persistence: Arc<PersistenceStore>,
    snapshots: Arc<SnapshotStore>,
    retry: Arc<RetryController>,
    monitor: Arc<ResourceMonitor>,
    manager: Arc<QueueManager>,
    scheduler: Arc<Scheduler>,
    reconciler: Arc<OfflineReconciler>,
    recovery: Arc<RecoveryOrchestrator>,
    migrations: Arc<Mutex<MigrationStore>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine over a fresh in-memory store; for development and tests.
    pub fn in_memory() -> Self {
        EngineBuilder::new().build()
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn persistence(&self) -> &Arc<PersistenceStore> {
        &self.persistence
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn retry(&self) -> &Arc<RetryController> {
        &self.retry
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &Arc<OfflineReconciler> {
        &self.reconciler
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    pub fn migrations(&self) -> &Arc<Mutex<MigrationStore>> {
        &self.migrations
    }

    /// Load a player's queue, reconciling offline progress first when the
    /// queue opts in. Falls back to the recovery pipeline when the load
    /// surfaces corruption.
    pub async fn load_queue(
        &self,
        player_id: &str,
        ctx: &OpContext,
    ) -> Result<(TaskQueue, Option<OfflineProgress>), EngineError> {
        match self.persistence.load(player_id).await {
            Ok(Some(queue)) => {
                let progress = if queue.config.offline_processing_enabled {
                    Some(self.reconciler.reconcile(player_id, ctx).await?)
                } else {
                    None
                };
                let queue = self
                    .persistence
                    .load(player_id)
                    .await?
                    .unwrap_or(queue);
                self.recovery.cache_queue(&queue);
                Ok((queue, progress))
            }
            Ok(None) => Ok((TaskQueue::new(player_id), None)),
            Err(EngineError::QueueUnrepairable(_)) => {
                let outcome = self.recovery.recover(player_id).await?;
                Ok((outcome.queue, None))
            }
            Err(err) => Err(err),
        }
    }

    /// Run the recovery pipeline for a player.
    pub async fn recover(&self, player_id: &str) -> Result<RecoveryOutcome, EngineError> {
        self.recovery.recover(player_id).await
    }

    /// Spawn the scheduler and resource-monitor loops.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(
            Arc::clone(&self.scheduler).run(self.cancel.child_token()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.monitor).run(self.cancel.child_token()),
        ));
        info!("Engine started");
    }

    /// Cancel the loops and wait for them to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogwork_queue_types::{ActivityPayload, Task};

    fn payload() -> ActivityPayload {
        ActivityPayload::Harvesting {
            activity_id: "copper-vein".to_string(),
            base_reward_rate: 10,
            primary_resource_id: "copper-ore".to_string(),
            rare_drop: None,
        }
    }

    #[tokio::test]
    async fn test_builder_wires_defaults() {
        let engine = Engine::in_memory();
        assert_eq!(engine.store().backend_name(), "in-memory");
    }

    #[tokio::test]
    async fn test_load_queue_of_new_player_is_empty() {
        let engine = Engine::in_memory();
        let ctx = OpContext::unbounded();
        let (queue, progress) = engine.load_queue("player-1", &ctx).await.unwrap();
        assert!(queue.queued_tasks.is_empty());
        assert!(progress.is_none());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = Engine::in_memory();
        engine.start();
        let ctx = OpContext::unbounded();
        engine
            .manager()
            .add_task(
                "player-1",
                Task::new("player-1", "Mine", 30_000, payload()),
                &ctx,
            )
            .await
            .unwrap();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_queue_reconciles_offline_progress() {
        let engine = Engine::in_memory();
        let ctx = OpContext::unbounded();
        engine
            .manager()
            .add_task(
                "player-1",
                Task::new("player-1", "Mine", 600_000, payload()),
                &ctx,
            )
            .await
            .unwrap();

        let (_, progress) = engine.load_queue("player-1", &ctx).await.unwrap();
        // A fresh queue has no gap, so reconciliation runs but awards
        // nothing
        let progress = progress.unwrap();
        assert_eq!(progress.minutes_awarded, 0);
    }
}
