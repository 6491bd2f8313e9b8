//! # Queue Storage Abstractions and Implementations
//!
//! **Pluggable queue storage backends with atomic persistence, integrity
//! validation and repair, snapshots, and schema migrations.**
//!
//! The engine persists one durable record per player queue. This crate
//! provides the `QueueStore` backend trait (a key/value store with
//! conditional writes plus a log-append store), an in-memory implementation
//! for development and testing, a DynamoDB implementation for production,
//! and the backend-agnostic layers above: `PersistenceStore` (the atomic
//! read-modify-write loop), the integrity validator/repairer,
//! `SnapshotStore`, and `MigrationStore`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use cogwork_queue_storage::prelude::*;
//! use cogwork_queue_types::{EngineError, Task, ActivityPayload};
//!
//! # async fn example() -> Result<(), EngineError> {
//! let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
//! let persistence = PersistenceStore::new(store);
//!
//! // Load → mutate → conditional save, with conflict replay
//! let queue = persistence
//!     .atomic_update("player-1", &OpContext::unbounded(), SaveOptions::default(), |q| {
//!         q.queued_tasks.push(Task::new(
//!             "player-1",
//!             "Mine copper",
//!             30_000,
//!             ActivityPayload::Harvesting {
//!                 activity_id: "copper-vein".to_string(),
//!                 base_reward_rate: 10,
//!                 primary_resource_id: "copper-ore".to_string(),
//!                 rare_drop: None,
//!             },
//!         ));
//!         Ok(())
//!     })
//!     .await?;
//! assert_eq!(queue.version, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`QueueStore` trait**: backend abstraction (conditional put, index
//!   queries, snapshots, events, migration records)
//! - **`PersistenceStore`**: optimistic-concurrency save loop, validated
//!   loads with bounded repair
//! - **`validator`**: corruption classification and repair actions
//! - **`SnapshotStore`** / **`MigrationStore`**: restore points and schema
//!   evolution

// Core modules
pub mod error;
#[cfg(feature = "in-memory")]
pub mod in_memory;
pub mod migration;
pub mod persistence;
pub mod prelude;
pub mod snapshot;
pub mod traits;
pub mod validator;

// Durable storage backends
#[cfg(feature = "dynamodb")]
pub mod dynamodb;

// Parity test suite (shared across all backends)
#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod parity_tests;

// Re-exports for convenience
pub use error::QueueStorageError;
#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryQueueConfig, InMemoryQueueStore};
pub use migration::{Migration, MigrationStore, TransformFn, ValidateFn};
pub use persistence::{PersistenceConfig, PersistenceStore, SaveOptions};
pub use snapshot::{COMPRESS_HISTORY_KEEP, COMPRESS_REWARDS_KEEP, SnapshotStore, compress};
pub use traits::{
    MigrationRecord, MigrationStatus, OpContext, QueueIndexAttributes, QueueStore,
    SNAPSHOT_TTL_SECONDS, SnapshotReason, SnapshotRecord, StoredQueue,
};
pub use validator::{
    CLOCK_SKEW_TOLERANCE_MS, IssueCode, RepairAction, Severity, ValidationIssue,
    ValidationReport,
};

#[cfg(feature = "dynamodb")]
pub use dynamodb::{DynamoDbQueueConfig, DynamoDbQueueStore};

/// Create a default in-memory queue store for development and testing.
#[cfg(feature = "in-memory")]
pub fn create_default_store() -> InMemoryQueueStore {
    InMemoryQueueStore::new()
}
