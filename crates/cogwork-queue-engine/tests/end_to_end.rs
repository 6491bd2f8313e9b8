//! End-to-end scenarios for the queue engine, run against the in-memory
//! backend through the public `Engine` surface.

use std::sync::Arc;
use std::time::Duration;

use cogwork_queue_engine::prelude::*;
use cogwork_queue_types::RewardKind;

fn harvesting_payload() -> ActivityPayload {
    ActivityPayload::Harvesting {
        activity_id: "copper-vein".to_string(),
        base_reward_rate: 10,
        primary_resource_id: "copper-ore".to_string(),
        rare_drop: None,
    }
}

fn harvesting_task(player: &str, name: &str, duration_ms: u64, priority: i32) -> Task {
    Task::new(player, name, duration_ms, harvesting_payload()).with_priority(priority)
}

/// Scenario: add a task to an empty queue, watch it run to completion.
#[tokio::test]
async fn add_then_run() {
    let engine = Engine::in_memory();
    let ctx = OpContext::unbounded();

    let queue = engine
        .manager()
        .add_task("P1", harvesting_task("P1", "T1", 30_000, 5), &ctx)
        .await
        .unwrap();
    let current = queue.current_task.as_ref().expect("auto-start engaged");
    assert_eq!(current.name, "T1");
    assert!(queue.is_running);
    assert_eq!(queue.queued_tasks.len(), 0);
    let started_at = current.start_time_ms;

    // Halfway: progress ≈ 0.5
    let queue = engine
        .scheduler()
        .tick_player_at("P1", started_at + 15_000)
        .await
        .unwrap()
        .unwrap();
    let progress = queue.current_task.as_ref().unwrap().progress;
    assert!((progress - 0.5).abs() < 0.01, "progress was {}", progress);

    // Done: totals advance, queue idles
    let queue = engine
        .scheduler()
        .tick_player_at("P1", started_at + 30_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queue.totals.tasks_completed, 1);
    assert!(queue.current_task.is_none());
    assert!(!queue.is_running);
}

/// Scenario: priority insertion never preempts the current task.
#[tokio::test]
async fn priority_insertion() {
    let engine = Engine::in_memory();
    let ctx = OpContext::unbounded();

    engine
        .manager()
        .update_config(
            "P1",
            QueueConfigUpdate {
                priority_handling: Some(true),
                ..Default::default()
            },
            &ctx,
        )
        .await
        .unwrap();

    // Running X with [A(p=1), B(p=1)] waiting
    engine
        .manager()
        .add_task("P1", harvesting_task("P1", "X", 120_000, 9), &ctx)
        .await
        .unwrap();
    engine
        .manager()
        .add_task("P1", harvesting_task("P1", "A", 30_000, 1), &ctx)
        .await
        .unwrap();
    engine
        .manager()
        .add_task("P1", harvesting_task("P1", "B", 30_000, 1), &ctx)
        .await
        .unwrap();

    let queue = engine
        .manager()
        .add_task("P1", harvesting_task("P1", "C", 30_000, 5), &ctx)
        .await
        .unwrap();

    assert_eq!(queue.current_task.as_ref().unwrap().name, "X");
    let names: Vec<&str> = queue.queued_tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["C", "A", "B"]);
}

/// Scenario: two concurrent adds race on the version; the loser replays
/// and both tasks land exactly once.
#[tokio::test]
async fn optimistic_conflict() {
    let engine = Arc::new(Engine::in_memory());
    let ctx = OpContext::unbounded();

    // Walk the stored record to version 7
    engine
        .manager()
        .update_config(
            "P1",
            QueueConfigUpdate {
                auto_start: Some(false),
                ..Default::default()
            },
            &ctx,
        )
        .await
        .unwrap();
    for i in 0..6 {
        engine
            .manager()
            .add_task(
                "P1",
                harvesting_task("P1", &format!("warmup-{}", i), 10_000, 0),
                &ctx,
            )
            .await
            .unwrap();
    }
    let queue = engine.persistence().load("P1").await.unwrap().unwrap();
    assert_eq!(queue.version, 7);

    let first = {
        let engine = Arc::clone(&engine);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            engine
                .manager()
                .add_task("P1", harvesting_task("P1", "racer-1", 10_000, 0), &ctx)
                .await
        })
    };
    let second = {
        let engine = Arc::clone(&engine);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            engine
                .manager()
                .add_task("P1", harvesting_task("P1", "racer-2", 10_000, 0), &ctx)
                .await
        })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let queue = engine.persistence().load("P1").await.unwrap().unwrap();
    assert_eq!(queue.version, 9, "both saves landed, one after a replay");
    let racers = queue
        .queued_tasks
        .iter()
        .filter(|t| t.name.starts_with("racer"))
        .count();
    assert_eq!(racers, 2);
}

/// Scenario: a stored checksum that disagrees with the content is repaired
/// on load, and the following load is clean.
#[tokio::test]
async fn checksum_repair() {
    let engine = Engine::in_memory();
    let ctx = OpContext::unbounded();

    engine
        .manager()
        .add_task("P1", harvesting_task("P1", "T1", 30_000, 0), &ctx)
        .await
        .unwrap();
    let before = engine.persistence().load("P1").await.unwrap().unwrap();

    // Corrupt the stored checksum behind the engine's back
    let mut record = engine.store().load_queue("P1").await.unwrap().unwrap();
    let mut tampered = record.to_queue().unwrap();
    tampered.checksum = "0".repeat(64);
    record.queue_data = serde_json::to_string(&tampered).unwrap();
    engine
        .store()
        .put_queue(record, Some(before.version))
        .await
        .unwrap();

    let repaired = engine.persistence().load("P1").await.unwrap().unwrap();
    assert!(repaired.checksum_valid());
    assert_eq!(repaired.version, before.version + 1);

    let clean = engine.persistence().load("P1").await.unwrap().unwrap();
    assert_eq!(clean.version, repaired.version, "second load saved nothing");
}

/// Scenario: snapshot store empty, current task orphaned; the recovery
/// cascade stops at state repair; no fallback is needed.
#[tokio::test]
async fn recovery_cascade() {
    let engine = Engine::in_memory();

    // Plant a record whose current task also sits in the waiting list
    let mut queue = TaskQueue::new("P1");
    let task = harvesting_task("P1", "T1", 30_000, 0);
    queue.current_task = Some(task.clone());
    queue.queued_tasks.push(task);
    queue.is_running = true;
    queue.version = 2;
    queue.refresh_checksum();
    engine
        .store()
        .put_queue(StoredQueue::from_queue(&queue).unwrap(), None)
        .await
        .unwrap();

    let outcome = engine.recover("P1").await.unwrap();
    assert_eq!(outcome.strategy, RecoveryStrategy::StateRepair);
    assert!(!outcome.degraded);
    assert!(outcome.queue.current_task.is_none());
    assert!(!outcome.queue.is_running);
}

/// Scenario: five failed saves open the circuit; the sixth call fails fast
/// with a ~60 s retry hint; after the window a success closes it.
#[tokio::test(start_paused = true)]
async fn circuit_breaker() {
    let engine = Engine::builder()
        .retry_policy(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        })
        .build();
    let retry = engine.retry();

    for _ in 0..5 {
        let result: Result<(), EngineError> = retry
            .execute("P1", OperationKind::Save, || async {
                Err(EngineError::NetworkTimeout("store unreachable".to_string()))
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "NET_TIMEOUT");
    }

    // Sixth call: immediate rejection with the remaining window
    let result: Result<(), EngineError> = retry
        .execute("P1", OperationKind::Save, || async { Ok(()) })
        .await;
    match result {
        Err(EngineError::CircuitOpen {
            time_until_retry_ms,
        }) => {
            assert!(time_until_retry_ms > 59_000 && time_until_retry_ms <= 60_000);
        }
        other => panic!("expected CircuitOpen, got: {:?}", other),
    }

    tokio::time::advance(Duration::from_secs(60)).await;

    // Allowed again; success closes the circuit
    retry
        .execute("P1", OperationKind::Save, || async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(retry.state("P1", OperationKind::Save), CircuitState::Closed);
}

/// Scenario: a 90-minute gap at harvesting base-rate 10 and level 10
/// awards ⌊90·10·(1 + 10·0.1)⌋ = 1800 experience plus resource drops.
#[tokio::test]
async fn offline_reconciliation() {
    struct LevelTen;
    #[async_trait::async_trait]
    impl PlayerStatsProvider for LevelTen {
        async fn stats(&self, _player_id: &str) -> Result<PlayerStats, EngineError> {
            Ok(PlayerStats::with_level(10))
        }
    }

    let engine = Engine::builder()
        .stats_provider(Arc::new(LevelTen))
        .build();
    let ctx = OpContext::unbounded();

    let queue = engine
        .manager()
        .add_task("P1", harvesting_task("P1", "Harvest", 2 * 3_600_000, 0), &ctx)
        .await
        .unwrap();
    let t0 = queue.last_updated_ms;

    // Reconcile 90 minutes later (not clamped)
    let progress = engine
        .reconciler()
        .reconcile_at("P1", t0 + 90 * 60_000, &ctx)
        .await
        .unwrap();

    assert_eq!(progress.elapsed_minutes, 90);
    assert!(!progress.capped);
    let experience: u64 = progress
        .rewards
        .iter()
        .filter(|r| r.kind == RewardKind::Experience)
        .map(|r| r.quantity)
        .sum();
    assert_eq!(experience, 1_800);
    let resources: u64 = progress
        .rewards
        .iter()
        .filter(|r| r.kind == RewardKind::Resource)
        .map(|r| r.quantity)
        .sum();
    assert_eq!(resources, 90);

    // last_updated advanced past t₀
    let queue = engine.persistence().load("P1").await.unwrap().unwrap();
    assert!(queue.last_updated_ms > t0);
}

/// Boundary: a gap past 24 hours clamps to 1440 minutes of progress.
#[tokio::test]
async fn offline_gap_clamps_to_a_day() {
    let engine = Engine::in_memory();
    let ctx = OpContext::unbounded();

    let queue = engine
        .manager()
        .add_task(
            "P1",
            // Two-day task so the clamp shows in the minutes, not completion
            harvesting_task("P1", "Expedition", 48 * 3_600_000, 0),
            &ctx,
        )
        .await
        .unwrap();
    let t0 = queue.last_updated_ms;

    let progress = engine
        .reconciler()
        .reconcile_at("P1", t0 + 30 * 3_600_000, &ctx)
        .await
        .unwrap();

    assert!(progress.capped);
    assert_eq!(progress.minutes_awarded, MAX_OFFLINE_MINUTES);
}

/// Boundary: restoration hands back a queue whose checksum matches the
/// canonical hash of its stable subset.
#[tokio::test]
async fn snapshot_restore_checksum_holds() {
    let engine = Engine::in_memory();
    let ctx = OpContext::unbounded();

    engine
        .manager()
        .add_task("P1", harvesting_task("P1", "T1", 30_000, 0), &ctx)
        .await
        .unwrap();
    let queue = engine.persistence().load("P1").await.unwrap().unwrap();
    let record = engine
        .snapshots()
        .snapshot(&queue, SnapshotReason::Manual)
        .await
        .unwrap();

    let restored = engine
        .snapshots()
        .restore_queue(&record.snapshot_id, "P1")
        .await
        .unwrap();
    assert!(restored.checksum_valid());
    assert_eq!(restored.version, queue.version);
}
