//! Convenience re-exports for engine consumers.

pub use crate::advance::{AdvanceOutcome, advance_queue};
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::manager::QueueManager;
pub use crate::offline::{MAX_OFFLINE_MINUTES, OfflineProgress, OfflineReconciler};
pub use crate::recovery::{
    BackupProvider, RecoveryOrchestrator, RecoveryOutcome, RecoveryStrategy,
};
pub use crate::resource::{
    DegradationLevel, ManualProbe, ResourceMonitor, ResourceProbe, ResourceSample,
};
pub use crate::retry::{CircuitState, OperationKind, RetryController, RetryPolicy};
pub use crate::scheduler::{Scheduler, SchedulerConfig};

pub use cogwork_queue_storage::prelude::*;
pub use cogwork_queue_types::{
    ActivityPayload, EngineError, PlayerStats, PlayerStatsProvider, QueueConfig,
    QueueConfigUpdate, RewardCalculator, StandardRewardCalculator, Task, TaskQueue, TaskReward,
    TaskType,
};
