//! # Cogwork Queue Engine
//!
//! **The per-player task-queue engine: queue lifecycle, continuous
//! scheduling, retry and circuit-breaker protection, ordered recovery, and
//! offline-progress reconciliation.**
//!
//! A process holds one [`Engine`], built with [`EngineBuilder`], which owns
//! every component and spawns the scheduler and resource-monitor loops
//! under a root cancellation token. Per-player concurrency is optimistic
//! end to end: every mutation is a conditional write on the queue's
//! monotonic version, and losers reload and replay.
//!
//! ## Quick Start
//!
//! ```rust
//! use cogwork_queue_engine::prelude::*;
//!
//! # async fn example() -> Result<(), EngineError> {
//! let engine = Engine::in_memory();
//! engine.start();
//!
//! let ctx = OpContext::unbounded();
//! engine
//!     .manager()
//!     .add_task(
//!         "player-1",
//!         Task::new(
//!             "player-1",
//!             "Mine copper",
//!             30_000,
//!             ActivityPayload::Harvesting {
//!                 activity_id: "copper-vein".to_string(),
//!                 base_reward_rate: 10,
//!                 primary_resource_id: "copper-ore".to_string(),
//!                 rare_drop: None,
//!             },
//!         ),
//!         &ctx,
//!     )
//!     .await?;
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod advance;
pub mod engine;
pub mod manager;
pub mod offline;
pub mod prelude;
pub mod recovery;
pub mod resource;
pub mod retry;
pub mod scheduler;

pub use advance::{AdvanceOutcome, advance_queue};
pub use engine::{Engine, EngineBuilder};
pub use manager::QueueManager;
pub use offline::{MAX_OFFLINE_MINUTES, OfflineProgress, OfflineReconciler};
pub use recovery::{BackupProvider, RecoveryOrchestrator, RecoveryOutcome, RecoveryStrategy};
pub use resource::{
    DegradationLevel, ManualProbe, ResourceMonitor, ResourceProbe, ResourceSample,
};
pub use retry::{CircuitState, OperationKind, RetryController, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig};
