//! Unified error types for queue storage operations.

use cogwork_queue_types::EngineError;

/// Unified error type for storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueStorageError {
    #[error("Queue not found for player: {0}")]
    QueueNotFound(String),

    #[error("Version conflict for player {player_id}: expected {expected:?}, stored {stored:?}")]
    VersionConflict {
        player_id: String,
        expected: Option<u64>,
        stored: Option<u64>,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot {snapshot_id} belongs to player {actual}, not {requested}")]
    SnapshotPlayerMismatch {
        snapshot_id: String,
        requested: String,
        actual: String,
    },

    #[error("Migration record not found: {0}")]
    MigrationNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Generic storage error: {0}")]
    Generic(String),
}

impl From<serde_json::Error> for QueueStorageError {
    fn from(err: serde_json::Error) -> Self {
        QueueStorageError::SerializationError(err.to_string())
    }
}

impl From<QueueStorageError> for EngineError {
    fn from(err: QueueStorageError) -> Self {
        match err {
            QueueStorageError::QueueNotFound(player_id) => EngineError::QueueNotFound(player_id),
            QueueStorageError::VersionConflict { player_id, .. } => {
                EngineError::VersionConflict(player_id)
            }
            QueueStorageError::SnapshotNotFound(id) => {
                EngineError::Internal(format!("snapshot not found: {}", id))
            }
            QueueStorageError::SnapshotPlayerMismatch {
                snapshot_id,
                requested,
                ..
            } => EngineError::Unauthorized(format!(
                "snapshot {} does not belong to player {}",
                snapshot_id, requested
            )),
            QueueStorageError::MigrationNotFound(id) => {
                EngineError::Internal(format!("migration record not found: {}", id))
            }
            QueueStorageError::DatabaseError(msg) => EngineError::ConnectionFailed(msg),
            QueueStorageError::SerializationError(msg) => EngineError::Internal(msg),
            QueueStorageError::Generic(msg) => EngineError::Internal(msg),
        }
    }
}
