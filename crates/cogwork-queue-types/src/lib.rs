//! # Cogwork Queue Types
//!
//! **Core data model for the Cogwork per-player task-queue engine.**
//!
//! Defines the serializable persistence models (tasks, queues, rewards,
//! completion events), the per-queue configuration surface, the canonical
//! checksum, the player stat sheet, the domain rewards contract, and the
//! unified error taxonomy shared by the storage and engine crates.
//!
//! ## Quick Start
//!
//! ```rust
//! use cogwork_queue_types::{ActivityPayload, Task, TaskQueue};
//!
//! let mut queue = TaskQueue::new("player-1");
//! let task = Task::new(
//!     "player-1",
//!     "Mine copper",
//!     30_000,
//!     ActivityPayload::Harvesting {
//!         activity_id: "copper-vein".to_string(),
//!         base_reward_rate: 10,
//!         primary_resource_id: "copper-ore".to_string(),
//!         rare_drop: None,
//!     },
//! );
//! queue.queued_tasks.push(task);
//! queue.refresh_checksum();
//! assert!(queue.checksum_valid());
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod event;
pub mod player;
pub mod queue;
pub mod rewards;
pub mod task;

pub use config::{QueueConfig, QueueConfigUpdate};
pub use error::EngineError;
pub use event::CompletionEvent;
pub use player::{PlayerStats, StatCategory};
pub use queue::{
    CURRENT_SCHEMA_VERSION, HealthLevel, QueueEventKind, QueueHealth, QueueStateEvent,
    QueueStatistics, QueueTotals, TaskQueue,
};
pub use rewards::{
    DefaultStatsProvider, PlayerStatsProvider, RewardCalculator, StandardRewardCalculator,
};
pub use task::{
    ActivityPayload, PrerequisiteKind, RareDrop, ResourceRequirement, RewardKind, Task,
    TaskPrerequisite, TaskReward, TaskType,
};
