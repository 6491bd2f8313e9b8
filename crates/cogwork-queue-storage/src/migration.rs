//! Versioned schema migrations with rollback.
//!
//! A migration step transforms the serialized queue blob (`serde_json::Value`)
//! from one schema version to the next, so steps stay applicable to blobs
//! written before the current `TaskQueue` shape existed. Multi-step plans
//! are built by walking registered `from → to` edges; a missing edge fails
//! with `BUS_PLAN_IMPOSSIBLE`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use cogwork_queue_types::{EngineError, TaskQueue};

use crate::persistence::{PersistenceStore, SaveOptions};
use crate::snapshot::SnapshotStore;
use crate::traits::{MigrationRecord, MigrationStatus, QueueStore, SnapshotReason};

/// Forward or rollback transform over the serialized queue blob.
pub type TransformFn = Arc<dyn Fn(Value) -> Result<Value, EngineError> + Send + Sync>;
/// Post-transform acceptance check.
pub type ValidateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One registered schema migration step.
#[derive(Clone)]
pub struct Migration {
    pub id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub forward: TransformFn,
    pub rollback: Option<TransformFn>,
    pub validate: ValidateFn,
}

impl Migration {
    pub fn new(
        id: impl Into<String>,
        from_version: u32,
        to_version: u32,
        forward: TransformFn,
    ) -> Self {
        Self {
            id: id.into(),
            from_version,
            to_version,
            forward,
            rollback: None,
            validate: Arc::new(|_| true),
        }
    }

    pub fn with_rollback(mut self, rollback: TransformFn) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_validate(mut self, validate: ValidateFn) -> Self {
        self.validate = validate;
        self
    }
}

/// Executes registered migrations over every stored queue.
pub struct MigrationStore {
    store: Arc<dyn QueueStore>,
    persistence: Arc<PersistenceStore>,
    snapshots: SnapshotStore,
    migrations: Vec<Migration>,
}

impl MigrationStore {
    pub fn new(store: Arc<dyn QueueStore>, persistence: Arc<PersistenceStore>) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&store)),
            store,
            persistence,
            migrations: Vec::new(),
        }
    }

    /// Register a migration step.
    pub fn register(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    /// Build an ordered chain of steps from `from` to `to` by walking the
    /// registered edges.
    pub fn plan(&self, from: u32, to: u32) -> Result<Vec<&Migration>, EngineError> {
        if from == to {
            return Ok(Vec::new());
        }
        // Versions form a sparse graph; follow edges breadth-first and
        // reconstruct the path.
        let mut edges: HashMap<u32, Vec<&Migration>> = HashMap::new();
        for migration in &self.migrations {
            edges
                .entry(migration.from_version)
                .or_default()
                .push(migration);
        }

        let mut predecessor: HashMap<u32, &Migration> = HashMap::new();
        let mut frontier = vec![from];
        let mut visited = std::collections::HashSet::from([from]);
        while let Some(version) = frontier.pop() {
            for step in edges.get(&version).into_iter().flatten().copied() {
                if visited.insert(step.to_version) {
                    predecessor.insert(step.to_version, step);
                    if step.to_version == to {
                        let mut path = Vec::new();
                        let mut cursor = to;
                        while cursor != from {
                            let step = predecessor[&cursor];
                            path.push(step);
                            cursor = step.from_version;
                        }
                        path.reverse();
                        return Ok(path);
                    }
                    frontier.push(step.to_version);
                }
            }
        }
        Err(EngineError::PlanImpossible { from, to })
    }

    /// Run the migration chain from `from` to `to` across all queues.
    ///
    /// Each affected queue is snapshotted (reason before-update) before its
    /// blob is transformed; the transformed queue is saved without
    /// re-validation. Per-player failures accumulate; the run continues.
    pub async fn run(&self, from: u32, to: u32) -> Result<MigrationRecord, EngineError> {
        let steps = self.plan(from, to)?;
        let mut record = MigrationRecord {
            migration_id: Uuid::now_v7().to_string(),
            from_version: from,
            to_version: to,
            timestamp_ms: Utc::now().timestamp_millis(),
            status: MigrationStatus::InProgress,
            affected_players: Vec::new(),
            error: None,
        };
        self.store.put_migration_record(record.clone()).await?;
        info!(
            migration_id = %record.migration_id,
            from, to,
            steps = steps.len(),
            "Starting schema migration"
        );

        let mut errors = Vec::new();
        for player_id in self.store.list_players().await? {
            match self.migrate_player(&player_id, from, to, &steps).await {
                Ok(true) => record.affected_players.push(player_id),
                Ok(false) => {}
                Err(err) => {
                    error!(
                        player_id = %player_id,
                        error = %err,
                        "Migration failed for player; continuing"
                    );
                    errors.push(format!("{}: {}", player_id, err));
                }
            }
        }

        record.status = if errors.is_empty() {
            MigrationStatus::Completed
        } else {
            MigrationStatus::Failed
        };
        record.error = (!errors.is_empty()).then(|| errors.join("; "));
        self.store.put_migration_record(record.clone()).await?;
        info!(
            migration_id = %record.migration_id,
            affected = record.affected_players.len(),
            failed = errors.len(),
            "Schema migration finished"
        );
        Ok(record)
    }

    /// Re-apply rollback transforms for a completed run, reversing the step
    /// for every affected player still at `to_version`.
    pub async fn rollback(&self, migration_id: &str) -> Result<MigrationRecord, EngineError> {
        let mut record = self
            .store
            .get_migration_record(migration_id)
            .await?
            .ok_or_else(|| {
                EngineError::Internal(format!("migration record not found: {}", migration_id))
            })?;

        let forward_steps = self.plan(record.from_version, record.to_version)?;
        let mut reverse_steps = Vec::new();
        for step in forward_steps.iter().rev().copied() {
            match &step.rollback {
                Some(rollback) => reverse_steps.push((step, Arc::clone(rollback))),
                None => {
                    return Err(EngineError::PlanImpossible {
                        from: record.to_version,
                        to: record.from_version,
                    });
                }
            }
        }

        let mut errors = Vec::new();
        for player_id in record.affected_players.clone() {
            let result = async {
                let Some(stored) = self.store.load_queue(&player_id).await? else {
                    return Ok::<bool, EngineError>(false);
                };
                let mut blob: Value =
                    serde_json::from_str(&stored.queue_data).map_err(EngineError::from)?;
                if blob_schema_version(&blob)? != record.to_version {
                    return Ok(false);
                }
                for (step, rollback) in &reverse_steps {
                    blob = rollback(blob)?;
                    set_blob_schema_version(&mut blob, step.from_version);
                }
                let mut queue: TaskQueue =
                    serde_json::from_value(blob).map_err(EngineError::from)?;
                queue.version = stored.version;
                queue.refresh_checksum();
                self.persistence
                    .save(&mut queue, SaveOptions::restore())
                    .await?;
                Ok(true)
            }
            .await;
            if let Err(err) = result {
                warn!(player_id = %player_id, error = %err, "Rollback failed for player");
                errors.push(format!("{}: {}", player_id, err));
            }
        }

        record.status = MigrationStatus::RolledBack;
        record.error = (!errors.is_empty()).then(|| errors.join("; "));
        self.store.put_migration_record(record.clone()).await?;
        Ok(record)
    }

    /// Apply the step chain to one player. `Ok(true)` when migrated,
    /// `Ok(false)` when the queue was not at `from` version.
    async fn migrate_player(
        &self,
        player_id: &str,
        from: u32,
        to: u32,
        steps: &[&Migration],
    ) -> Result<bool, EngineError> {
        let Some(stored) = self.store.load_queue(player_id).await? else {
            return Ok(false);
        };
        let mut blob: Value =
            serde_json::from_str(&stored.queue_data).map_err(EngineError::from)?;
        if blob_schema_version(&blob)? != from {
            return Ok(false);
        }

        // Snapshot the pre-image so the step can be reversed even without a
        // registered rollback transform.
        if let Ok(pre_image) = serde_json::from_value::<TaskQueue>(blob.clone()) {
            self.snapshots
                .snapshot(&pre_image, SnapshotReason::BeforeUpdate)
                .await?;
        }

        for step in steps {
            blob = (step.forward)(blob)?;
            set_blob_schema_version(&mut blob, step.to_version);
            if !(step.validate)(&blob) {
                return Err(EngineError::Internal(format!(
                    "migration {} produced an invalid blob",
                    step.id
                )));
            }
        }

        let mut queue: TaskQueue = serde_json::from_value(blob).map_err(EngineError::from)?;
        queue.schema_version = to;
        queue.version = stored.version;
        queue.refresh_checksum();
        self.persistence
            .save(&mut queue, SaveOptions::restore())
            .await?;
        Ok(true)
    }
}

fn blob_schema_version(blob: &Value) -> Result<u32, EngineError> {
    blob.get("schema_version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| EngineError::Internal("queue blob has no schema_version".to_string()))
}

fn set_blob_schema_version(blob: &mut Value, version: u32) {
    if let Some(object) = blob.as_object_mut() {
        object.insert("schema_version".to_string(), Value::from(version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryQueueStore;

    fn fixture() -> (Arc<InMemoryQueueStore>, Arc<PersistenceStore>, MigrationStore) {
        let store = Arc::new(InMemoryQueueStore::new());
        let persistence = Arc::new(PersistenceStore::new(
            store.clone() as Arc<dyn QueueStore>
        ));
        let migrations = MigrationStore::new(
            store.clone() as Arc<dyn QueueStore>,
            Arc::clone(&persistence),
        );
        (store, persistence, migrations)
    }

    /// Step that stamps a marker field into the blob.
    fn marker_step(id: &str, from: u32, to: u32, marker: &'static str) -> Migration {
        Migration::new(id, from, to, Arc::new(move |mut blob: Value| {
            blob.as_object_mut()
                .unwrap()
                .insert(marker.to_string(), Value::from(true));
            Ok(blob)
        }))
        .with_rollback(Arc::new(move |mut blob: Value| {
            blob.as_object_mut().unwrap().remove(marker);
            Ok(blob)
        }))
    }

    #[test]
    fn test_plan_walks_edges() {
        let (_, _, mut migrations) = fixture();
        migrations.register(marker_step("m1", 1, 2, "m1"));
        migrations.register(marker_step("m2", 2, 3, "m2"));

        let plan = migrations.plan(1, 3).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].id, "m1");
        assert_eq!(plan[1].id, "m2");

        assert!(migrations.plan(1, 1).unwrap().is_empty());
    }

    #[test]
    fn test_plan_missing_edge_is_impossible() {
        let (_, _, mut migrations) = fixture();
        migrations.register(marker_step("m1", 1, 2, "m1"));
        let result = migrations.plan(1, 4);
        assert!(matches!(
            result,
            Err(EngineError::PlanImpossible { from: 1, to: 4 })
        ));
    }

    #[tokio::test]
    async fn test_run_migrates_matching_queues_only() {
        let (store, persistence, mut migrations) = fixture();
        migrations.register(
            marker_step("m1", 1, 2, "migrated_marker").with_validate(Arc::new(|blob| {
                blob.get("migrated_marker").is_some()
            })),
        );

        // Two queues at schema 1, one already at 2
        for player in ["player-a", "player-b"] {
            let mut queue = TaskQueue::new(player);
            persistence
                .save(&mut queue, SaveOptions::default())
                .await
                .unwrap();
        }
        let mut ahead = TaskQueue::new("player-c");
        ahead.schema_version = 2;
        persistence
            .save(&mut ahead, SaveOptions::default())
            .await
            .unwrap();

        let record = migrations.run(1, 2).await.unwrap();
        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.affected_players.len(), 2);
        assert!(record.error.is_none());

        let migrated = persistence.load("player-a").await.unwrap().unwrap();
        assert_eq!(migrated.schema_version, 2);
        // Version advanced by the save
        assert_eq!(migrated.version, 2);

        // Snapshots were taken before each transform
        assert_eq!(store.list_snapshots("player-a", 10).await.unwrap().len(), 1);
        // The untouched queue kept its version
        let untouched = persistence.load("player-c").await.unwrap().unwrap();
        assert_eq!(untouched.version, 1);
    }

    #[tokio::test]
    async fn test_failed_player_accumulates_and_run_continues() {
        let (_, persistence, mut migrations) = fixture();
        migrations.register(Migration::new(
            "m-explode",
            1,
            2,
            Arc::new(|blob: Value| {
                let player = blob["player_id"].as_str().unwrap_or_default().to_string();
                if player == "player-bad" {
                    Err(EngineError::Internal("transform refused".to_string()))
                } else {
                    Ok(blob)
                }
            }),
        ));

        for player in ["player-bad", "player-good"] {
            let mut queue = TaskQueue::new(player);
            persistence
                .save(&mut queue, SaveOptions::default())
                .await
                .unwrap();
        }

        let record = migrations.run(1, 2).await.unwrap();
        assert_eq!(record.status, MigrationStatus::Failed);
        assert_eq!(record.affected_players, vec!["player-good".to_string()]);
        assert!(record.error.as_deref().unwrap().contains("player-bad"));
    }

    #[tokio::test]
    async fn test_rollback_reverses_completed_run() {
        let (_, persistence, mut migrations) = fixture();
        migrations.register(marker_step("m1", 1, 2, "m1_marker"));

        let mut queue = TaskQueue::new("player-a");
        persistence
            .save(&mut queue, SaveOptions::default())
            .await
            .unwrap();

        let record = migrations.run(1, 2).await.unwrap();
        assert_eq!(record.status, MigrationStatus::Completed);

        let rolled = migrations.rollback(&record.migration_id).await.unwrap();
        assert_eq!(rolled.status, MigrationStatus::RolledBack);

        let restored = persistence.load("player-a").await.unwrap().unwrap();
        assert_eq!(restored.schema_version, 1);
    }

    #[tokio::test]
    async fn test_rollback_without_transform_is_impossible() {
        let (_, _, mut migrations) = fixture();
        migrations.register(Migration::new(
            "m-oneway",
            1,
            2,
            Arc::new(|blob: Value| Ok(blob)),
        ));
        let record = MigrationRecord {
            migration_id: "run-1".to_string(),
            from_version: 1,
            to_version: 2,
            timestamp_ms: 0,
            status: MigrationStatus::Completed,
            affected_players: vec!["player-a".to_string()],
            error: None,
        };
        migrations
            .store
            .put_migration_record(record)
            .await
            .unwrap();

        let result = migrations.rollback("run-1").await;
        assert!(matches!(result, Err(EngineError::PlanImpossible { .. })));
    }
}
