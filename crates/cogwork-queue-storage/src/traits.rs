//! Core storage trait and persisted record models.
//!
//! Defines the `QueueStore` trait and the record shapes persisted by the
//! backends (InMemory, DynamoDB). A `QueueStore` is the spec's external
//! persistence interface: a key/value store with conditional writes plus a
//! log-append store for completion events. Everything above it (atomic
//! updates, validation, snapshots, migrations) is backend-agnostic.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cogwork_queue_types::{CompletionEvent, EngineError, TaskQueue};

use crate::error::QueueStorageError;

/// Default snapshot TTL: 30 days.
pub const SNAPSHOT_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Denormalized attributes stored beside the queue blob.
///
/// These exist only to support secondary-index queries (finding queues that
/// need scheduler attention) and are maintained atomically with the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueIndexAttributes {
    /// `"true"` / `"false"`.
    pub is_running: String,
    /// `"true"` / `"false"`.
    pub is_paused: String,
    /// Current task id, or the sentinel `"none"`.
    pub current_task_id: String,
    pub queue_size: usize,
    pub total_tasks_completed: i64,
    /// ISO-8601 instant of the last scheduler pass.
    pub last_processed: String,
}

impl QueueIndexAttributes {
    /// Derive the indexed attributes from a queue.
    pub fn from_queue(queue: &TaskQueue) -> Self {
        let last_processed = Utc
            .timestamp_millis_opt(queue.last_updated_ms)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        Self {
            is_running: queue.is_running.to_string(),
            is_paused: queue.is_paused.to_string(),
            current_task_id: queue.current_task_id_attr(),
            queue_size: queue.queued_tasks.len(),
            total_tasks_completed: queue.totals.tasks_completed,
            last_processed,
        }
    }
}

/// Persistence model for one queue record as stored by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQueue {
    /// Partition key.
    pub player_id: String,
    /// Monotonic record version; the conditional-write discriminator.
    pub version: u64,
    /// Schema version the blob was written at.
    pub schema_version: u32,
    /// Hex SHA-256 of the queue's canonical subset.
    pub checksum: String,
    pub last_updated_ms: i64,
    pub last_validated_ms: i64,
    /// Serialized `TaskQueue` blob (JSON).
    pub queue_data: String,
    pub attributes: QueueIndexAttributes,
}

impl StoredQueue {
    /// Serialize a queue into its stored form.
    pub fn from_queue(queue: &TaskQueue) -> Result<Self, QueueStorageError> {
        Ok(Self {
            player_id: queue.player_id.clone(),
            version: queue.version,
            schema_version: queue.schema_version,
            checksum: queue.checksum.clone(),
            last_updated_ms: queue.last_updated_ms,
            last_validated_ms: queue.last_validated_ms,
            queue_data: serde_json::to_string(queue)?,
            attributes: QueueIndexAttributes::from_queue(queue),
        })
    }

    /// Deserialize the queue blob.
    pub fn to_queue(&self) -> Result<TaskQueue, QueueStorageError> {
        Ok(serde_json::from_str(&self.queue_data)?)
    }
}

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Periodic,
    BeforeUpdate,
    Manual,
    Recovery,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Periodic => "periodic",
            SnapshotReason::BeforeUpdate => "before_update",
            SnapshotReason::Manual => "manual",
            SnapshotReason::Recovery => "recovery",
        }
    }
}

/// A point-in-time, compressed copy of a queue kept for restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Unique snapshot id (UUID v7 for temporal ordering).
    pub snapshot_id: String,
    pub player_id: String,
    pub timestamp_ms: i64,
    pub reason: SnapshotReason,
    /// Version of the queue at snapshot time.
    pub version: u64,
    pub schema_version: u32,
    pub checksum: String,
    /// TTL in seconds from `timestamp_ms`; honored natively by stores that
    /// support it, swept by `maintenance()` otherwise.
    pub ttl_seconds: i64,
    /// Serialized compressed `TaskQueue` blob (JSON).
    pub snapshot_data: String,
}

impl SnapshotRecord {
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Epoch seconds after which the store may drop this snapshot.
    pub fn expires_at_epoch(&self) -> i64 {
        self.timestamp_ms / 1000 + self.ttl_seconds
    }
}

/// Lifecycle status of a schema migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

/// Persistence model for one migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub migration_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub timestamp_ms: i64,
    pub status: MigrationStatus,
    pub affected_players: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cancellation and deadline context threaded through every store operation.
///
/// Every store I/O is a suspension point; the orchestrator stack passes one
/// `OpContext` down so in-flight work observes cancellation and deadlines
/// uniformly.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub cancel: CancellationToken,
    /// Absolute deadline; `None` means unbounded.
    pub deadline: Option<tokio::time::Instant>,
}

impl OpContext {
    /// Context with no deadline and a fresh cancellation root.
    pub fn unbounded() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(tokio::time::Instant::now() + timeout),
        }
    }

    /// Child context sharing cancellation, with a tighter deadline.
    pub fn child_with_timeout(&self, timeout: std::time::Duration) -> Self {
        let candidate = tokio::time::Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    /// Fail with `TIM_DEADLINE_EXCEEDED` if the deadline passed, or treat a
    /// fired cancellation token the same way.
    pub fn check(&self, operation: &str) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::DeadlineExceeded(format!(
                "{} (cancelled)",
                operation
            )));
        }
        if let Some(deadline) = self.deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded(operation.to_string()));
            }
        }
        Ok(())
    }

    /// Remaining time before the deadline, if one is set.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Core trait for queue storage backends.
///
/// Implementations must be `Send + Sync` for use across async contexts.
/// Conditional writes are the backbone of the engine's optimistic
/// concurrency: `put_queue` with `expect_version = Some(v)` must fail with
/// `VersionConflict` unless the stored record is exactly at `v`, and with
/// `expect_version = None` must fail unless no record exists.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Human-readable name of the storage backend (e.g. "in-memory").
    fn backend_name(&self) -> &'static str;

    // === Queue records (key/value with conditional update) ===

    /// Strongly-consistent read of a queue record. `None` if absent.
    async fn load_queue(&self, player_id: &str)
    -> Result<Option<StoredQueue>, QueueStorageError>;

    /// Conditionally write a queue record.
    async fn put_queue(
        &self,
        record: StoredQueue,
        expect_version: Option<u64>,
    ) -> Result<(), QueueStorageError>;

    /// Delete a queue record. Returns `true` if deleted, `false` if absent.
    async fn delete_queue(&self, player_id: &str) -> Result<bool, QueueStorageError>;

    /// Player ids whose denormalized `is_running` attribute is `"true"`,
    /// via secondary-index query. Ordering follows `last_processed`.
    async fn query_active_queues(&self, limit: u32) -> Result<Vec<String>, QueueStorageError>;

    /// Total number of queue records.
    async fn queue_count(&self) -> Result<usize, QueueStorageError>;

    /// All player ids with a stored queue record. Used by migration scans;
    /// not a hot path.
    async fn list_players(&self) -> Result<Vec<String>, QueueStorageError>;

    // === Snapshots (TTL-expired) ===

    async fn put_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), QueueStorageError>;

    async fn get_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotRecord>, QueueStorageError>;

    /// Snapshots for a player, newest first.
    async fn list_snapshots(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<SnapshotRecord>, QueueStorageError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, QueueStorageError>;

    // === Completion events (log-append store) ===

    /// Append a completion event. Events are never updated.
    async fn append_event(&self, event: CompletionEvent) -> Result<(), QueueStorageError>;

    /// Most recent completion events for a player, newest first.
    async fn list_events(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<CompletionEvent>, QueueStorageError>;

    // === Migration records ===

    async fn put_migration_record(
        &self,
        record: MigrationRecord,
    ) -> Result<(), QueueStorageError>;

    async fn get_migration_record(
        &self,
        migration_id: &str,
    ) -> Result<Option<MigrationRecord>, QueueStorageError>;

    async fn list_migration_records(&self) -> Result<Vec<MigrationRecord>, QueueStorageError>;

    // === Cleanup ===

    /// Perform periodic maintenance (TTL sweep for backends without native
    /// expiry, compaction).
    async fn maintenance(&self) -> Result<(), QueueStorageError>;
}
