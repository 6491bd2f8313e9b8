//! Convenience re-exports for queue storage consumers.

pub use crate::error::QueueStorageError;
pub use crate::persistence::{PersistenceConfig, PersistenceStore, SaveOptions};
pub use crate::snapshot::SnapshotStore;
pub use crate::traits::{
    MigrationRecord, MigrationStatus, OpContext, QueueIndexAttributes, QueueStore,
    SnapshotReason, SnapshotRecord, StoredQueue,
};
pub use crate::validator::{
    IssueCode, RepairAction, Severity, ValidationIssue, ValidationReport,
};

#[cfg(feature = "in-memory")]
pub use crate::in_memory::{InMemoryQueueConfig, InMemoryQueueStore};

#[cfg(feature = "dynamodb")]
pub use crate::dynamodb::{DynamoDbQueueConfig, DynamoDbQueueStore};
