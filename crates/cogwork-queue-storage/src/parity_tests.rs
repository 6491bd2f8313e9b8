//! Shared behavioral test suite for `QueueStore` backends.
//!
//! Every backend must pass the same assertions so the engine can swap
//! stores without semantic drift. The in-memory backend runs these in CI;
//! the DynamoDB backend can run them against DynamoDB Local with the same
//! calls.

use crate::traits::{
    MigrationRecord, MigrationStatus, QueueStore, SnapshotReason, SnapshotRecord, StoredQueue,
};
use cogwork_queue_types::{CompletionEvent, TaskQueue, TaskType};

fn record_at(player_id: &str, version: u64) -> StoredQueue {
    let mut queue = TaskQueue::new(player_id);
    queue.version = version;
    queue.refresh_checksum();
    StoredQueue::from_queue(&queue).unwrap()
}

pub async fn test_create_then_load(store: &dyn QueueStore) {
    assert!(store.load_queue("parity-p1").await.unwrap().is_none());

    store.put_queue(record_at("parity-p1", 1), None).await.unwrap();

    let loaded = store.load_queue("parity-p1").await.unwrap().unwrap();
    assert_eq!(loaded.player_id, "parity-p1");
    assert_eq!(loaded.version, 1);
    let queue = loaded.to_queue().unwrap();
    assert!(queue.checksum_valid());
}

pub async fn test_conditional_create_conflicts_when_present(store: &dyn QueueStore) {
    store.put_queue(record_at("parity-p2", 1), None).await.unwrap();
    let result = store.put_queue(record_at("parity-p2", 1), None).await;
    assert!(
        matches!(
            result,
            Err(crate::error::QueueStorageError::VersionConflict { .. })
        ),
        "expected VersionConflict on duplicate create"
    );
}

pub async fn test_conditional_replace_requires_exact_version(store: &dyn QueueStore) {
    store.put_queue(record_at("parity-p3", 1), None).await.unwrap();
    store
        .put_queue(record_at("parity-p3", 2), Some(1))
        .await
        .unwrap();

    // A writer that still believes version 1 loses
    let result = store.put_queue(record_at("parity-p3", 2), Some(1)).await;
    assert!(matches!(
        result,
        Err(crate::error::QueueStorageError::VersionConflict { .. })
    ));

    let loaded = store.load_queue("parity-p3").await.unwrap().unwrap();
    assert_eq!(loaded.version, 2);
}

pub async fn test_delete_queue(store: &dyn QueueStore) {
    store.put_queue(record_at("parity-p4", 1), None).await.unwrap();
    assert!(store.delete_queue("parity-p4").await.unwrap());
    assert!(!store.delete_queue("parity-p4").await.unwrap());
    assert!(store.load_queue("parity-p4").await.unwrap().is_none());
}

pub async fn test_active_queue_index(store: &dyn QueueStore) {
    let mut running = TaskQueue::new("parity-p5-running");
    running.is_running = true;
    running.version = 1;
    running.refresh_checksum();
    store
        .put_queue(StoredQueue::from_queue(&running).unwrap(), None)
        .await
        .unwrap();
    store
        .put_queue(record_at("parity-p5-idle", 1), None)
        .await
        .unwrap();

    let active = store.query_active_queues(50).await.unwrap();
    assert!(active.contains(&"parity-p5-running".to_string()));
    assert!(!active.contains(&"parity-p5-idle".to_string()));
}

pub async fn test_snapshot_listing_order_and_limit(store: &dyn QueueStore) {
    for (index, ts) in [1_000i64, 5_000, 3_000].into_iter().enumerate() {
        store
            .put_snapshot(SnapshotRecord {
                snapshot_id: format!("parity-snap-{}", index),
                player_id: "parity-p6".to_string(),
                timestamp_ms: ts,
                reason: SnapshotReason::Periodic,
                version: index as u64,
                schema_version: 1,
                checksum: "00".repeat(32),
                ttl_seconds: 3_600,
                snapshot_data: "{}".to_string(),
            })
            .await
            .unwrap();
    }

    let listed = store.list_snapshots("parity-p6", 2).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].timestamp_ms, 5_000);
    assert_eq!(listed[1].timestamp_ms, 3_000);
}

pub async fn test_event_log_order(store: &dyn QueueStore) {
    for i in 0..3 {
        store
            .append_event(CompletionEvent::new(
                "parity-p7",
                format!("parity-task-{}", i),
                TaskType::Crafting,
                i,
                1_000,
                Vec::new(),
            ))
            .await
            .unwrap();
    }
    let events = store.list_events("parity-p7", 2).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "parity-task-2");
    assert_eq!(events[1].task_id, "parity-task-1");
}

pub async fn test_migration_record_round_trip(store: &dyn QueueStore) {
    let record = MigrationRecord {
        migration_id: "parity-mig-1".to_string(),
        from_version: 1,
        to_version: 2,
        timestamp_ms: 42,
        status: MigrationStatus::Completed,
        affected_players: vec!["parity-p8".to_string()],
        error: None,
    };
    store.put_migration_record(record.clone()).await.unwrap();
    let fetched = store
        .get_migration_record("parity-mig-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, record);
    assert!(
        store
            .list_migration_records()
            .await
            .unwrap()
            .iter()
            .any(|r| r.migration_id == "parity-mig-1")
    );
}

pub async fn test_player_listing(store: &dyn QueueStore) {
    store.put_queue(record_at("parity-p9-b", 1), None).await.unwrap();
    store.put_queue(record_at("parity-p9-a", 1), None).await.unwrap();
    let players = store.list_players().await.unwrap();
    let ours: Vec<&String> = players
        .iter()
        .filter(|p| p.starts_with("parity-p9"))
        .collect();
    assert_eq!(ours, vec!["parity-p9-a", "parity-p9-b"]);
}

#[cfg(test)]
mod in_memory_parity {
    use super::*;
    use crate::in_memory::InMemoryQueueStore;

    #[tokio::test]
    async fn parity_create_then_load() {
        test_create_then_load(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_conditional_create() {
        test_conditional_create_conflicts_when_present(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_conditional_replace() {
        test_conditional_replace_requires_exact_version(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_delete_queue() {
        test_delete_queue(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_active_index() {
        test_active_queue_index(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_snapshot_listing() {
        test_snapshot_listing_order_and_limit(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_event_log() {
        test_event_log_order(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_migration_records() {
        test_migration_record_round_trip(&InMemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn parity_player_listing() {
        test_player_listing(&InMemoryQueueStore::new()).await;
    }
}
