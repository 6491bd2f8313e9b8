//! Queue advancement: the one place progress, rewards, and completion are
//! computed.
//!
//! Both the online scheduler tick and the offline reconciler call
//! [`advance_queue`] with an explicit target instant, so a queue ticked
//! every few seconds and a queue reconciled over a long gap arrive at the
//! same totals. Rewards accrue per whole elapsed minute of the current
//! activity; when a task finishes inside the window the next one starts at
//! the finish instant, not at the wall clock, so multi-task catch-up stays
//! exact.

use tracing::debug;

use cogwork_queue_types::{
    CompletionEvent, EngineError, PlayerStats, QueueEventKind, RewardCalculator, TaskQueue,
};

/// What an advancement pass did.
#[derive(Debug, Default)]
pub struct AdvanceOutcome {
    /// Completion events to append to the log store, oldest first.
    pub completed: Vec<CompletionEvent>,
    /// Whole activity-minutes rewarded during the pass.
    pub minutes_awarded: u64,
    /// Whether any field changed (progress, rewards, membership).
    pub changed: bool,
}

/// Whole minutes contained in `elapsed_ms`.
fn whole_minutes(elapsed_ms: u64) -> u64 {
    elapsed_ms / 60_000
}

/// Advance a queue's current task up to `now_ms`.
///
/// Only queues with `is_running ∧ ¬is_paused ∧ current_task ≠ null` make
/// progress. The pass loops: award newly elapsed whole minutes via the
/// rewards callback, and on completion record totals, emit an event, and
/// start the next queued task at the completion instant.
pub async fn advance_queue(
    queue: &mut TaskQueue,
    now_ms: i64,
    calculator: &dyn RewardCalculator,
    stats: &PlayerStats,
) -> Result<AdvanceOutcome, EngineError> {
    let mut outcome = AdvanceOutcome::default();

    while queue.is_running && !queue.is_paused {
        let Some(current) = queue.current_task.as_mut() else {
            // Running with nothing current is an inconsistency the
            // validator repairs; normalize rather than spin.
            queue.is_running = false;
            outcome.changed = true;
            break;
        };

        if current.start_time_ms == 0 {
            current.start_time_ms = now_ms;
            outcome.changed = true;
        }
        if now_ms <= current.start_time_ms {
            break;
        }

        let duration_ms = current.duration_ms.max(1);
        let end_ms = current.start_time_ms + duration_ms as i64;
        let effective_ms = now_ms.min(end_ms);
        let elapsed_ms = (effective_ms - current.start_time_ms) as u64;

        let previous_elapsed_ms =
            (current.progress * duration_ms as f64).round() as u64;
        let minutes_due =
            whole_minutes(elapsed_ms).saturating_sub(whole_minutes(previous_elapsed_ms));
        if minutes_due > 0 {
            let rewards = calculator
                .compute_rewards(current.task_type, &current.payload, minutes_due, stats)
                .await?;
            current.rewards.extend(rewards.iter().cloned());
            queue.totals.rewards_earned.extend(rewards);
            outcome.minutes_awarded += minutes_due;
            outcome.changed = true;
        }

        let new_progress = (elapsed_ms as f64 / duration_ms as f64).min(1.0);
        if (new_progress - current.progress).abs() > f64::EPSILON {
            outcome.changed = true;
        }
        current.progress = new_progress;

        if effective_ms < end_ms {
            break;
        }

        // Task finished inside the window.
        current.progress = 1.0;
        current.completed = true;
        let finished = current.clone();
        queue.totals.tasks_completed += 1;
        queue.totals.time_spent_ms += duration_ms as i64;
        queue.push_history(
            QueueEventKind::TaskCompleted,
            Some(finished.id.clone()),
            None,
        );
        outcome.completed.push(CompletionEvent::new(
            queue.player_id.clone(),
            finished.id.clone(),
            finished.task_type,
            end_ms,
            duration_ms,
            finished.rewards.clone(),
        ));
        outcome.changed = true;
        debug!(
            player_id = %queue.player_id,
            task_id = %finished.id,
            "Task completed"
        );

        if queue.queued_tasks.is_empty() {
            queue.current_task = None;
            queue.is_running = false;
        } else {
            // Next task begins where the previous one ended so catch-up
            // over a gap matches real-time ticking.
            let mut next = queue.queued_tasks.remove(0);
            next.start_time_ms = end_ms;
            next.progress = 0.0;
            queue.push_history(QueueEventKind::TaskStarted, Some(next.id.clone()), None);
            queue.current_task = Some(next);
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogwork_queue_types::{
        ActivityPayload, RewardKind, StandardRewardCalculator, Task,
    };

    fn payload(rate: u64) -> ActivityPayload {
        ActivityPayload::Harvesting {
            activity_id: "copper-vein".to_string(),
            base_reward_rate: rate,
            primary_resource_id: "copper-ore".to_string(),
            rare_drop: None,
        }
    }

    fn running_queue(task_duration_ms: u64, start_ms: i64) -> TaskQueue {
        let mut queue = TaskQueue::new("player-1");
        let mut task = Task::new("player-1", "Mine", task_duration_ms, payload(10));
        task.start_time_ms = start_ms;
        queue.current_task = Some(task);
        queue.is_running = true;
        queue.refresh_checksum();
        queue
    }

    #[tokio::test]
    async fn test_partial_progress() {
        let mut queue = running_queue(30_000, 1_000);
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::default();

        let outcome = advance_queue(&mut queue, 16_000, &calc, &stats).await.unwrap();
        let current = queue.current_task.as_ref().unwrap();
        assert!((current.progress - 0.5).abs() < 1e-9);
        assert!(!current.completed);
        assert!(outcome.completed.is_empty());
        assert!(outcome.changed);
        assert!(queue.is_running);
    }

    #[tokio::test]
    async fn test_completion_empties_queue() {
        let mut queue = running_queue(30_000, 1_000);
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::default();

        let outcome = advance_queue(&mut queue, 31_000, &calc, &stats).await.unwrap();
        assert!(queue.current_task.is_none());
        assert!(!queue.is_running);
        assert_eq!(queue.totals.tasks_completed, 1);
        assert_eq!(queue.totals.time_spent_ms, 30_000);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].completed_at_ms, 31_000);
    }

    #[tokio::test]
    async fn test_catch_up_completes_multiple_tasks_back_to_back() {
        let mut queue = running_queue(60_000, 0);
        for name in ["Second", "Third"] {
            queue
                .queued_tasks
                .push(Task::new("player-1", name, 60_000, payload(10)));
        }

        let calc = StandardRewardCalculator;
        let stats = PlayerStats::default();
        // Window covers the first two tasks and half of the third
        let outcome = advance_queue(&mut queue, 150_000, &calc, &stats).await.unwrap();

        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(queue.totals.tasks_completed, 2);
        // Completions land at task boundaries, not at the wall clock
        assert_eq!(outcome.completed[0].completed_at_ms, 60_000);
        assert_eq!(outcome.completed[1].completed_at_ms, 120_000);

        let current = queue.current_task.as_ref().unwrap();
        assert_eq!(current.name, "Third");
        assert_eq!(current.start_time_ms, 120_000);
        assert!((current.progress - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_minutes_award_incrementally_without_double_counting() {
        let mut queue = running_queue(300_000, 0);
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::default();

        // Tick at 90s: one whole minute elapsed
        advance_queue(&mut queue, 90_000, &calc, &stats).await.unwrap();
        let after_first: u64 = queue
            .totals
            .rewards_earned
            .iter()
            .filter(|r| r.kind == RewardKind::Experience)
            .map(|r| r.quantity)
            .sum();
        assert_eq!(after_first, 10);

        // Tick again at the same instant: nothing new accrues
        let outcome = advance_queue(&mut queue, 90_000, &calc, &stats).await.unwrap();
        assert_eq!(outcome.minutes_awarded, 0);

        // Tick at 300s: the remaining 4 minutes accrue exactly once
        advance_queue(&mut queue, 300_000, &calc, &stats).await.unwrap();
        let total: u64 = queue
            .totals
            .rewards_earned
            .iter()
            .filter(|r| r.kind == RewardKind::Experience)
            .map(|r| r.quantity)
            .sum();
        assert_eq!(total, 50);
        assert_eq!(queue.totals.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_online_ticking_equals_single_gap() {
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::with_level(10);

        // Ticked every 5 seconds for 10 minutes
        let mut ticked = running_queue(600_000, 0);
        let mut t = 0;
        while t < 600_000 {
            t += 5_000;
            advance_queue(&mut ticked, t, &calc, &stats).await.unwrap();
        }

        // Reconciled in one 10-minute jump
        let mut jumped = running_queue(600_000, 0);
        advance_queue(&mut jumped, 600_000, &calc, &stats).await.unwrap();

        assert_eq!(ticked.totals.tasks_completed, jumped.totals.tasks_completed);
        let sum = |q: &TaskQueue| -> u64 {
            q.totals.rewards_earned.iter().map(|r| r.quantity).sum()
        };
        assert_eq!(sum(&ticked), sum(&jumped));
    }

    #[tokio::test]
    async fn test_paused_queue_makes_no_progress() {
        let mut queue = running_queue(30_000, 0);
        queue.is_paused = true;
        queue.pause_reason = Some("Out of coal".to_string());
        queue.is_running = false;

        let calc = StandardRewardCalculator;
        let outcome = advance_queue(&mut queue, 60_000, &calc, &PlayerStats::default())
            .await
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(queue.current_task.as_ref().unwrap().progress, 0.0);
    }

    #[tokio::test]
    async fn test_running_without_current_normalizes() {
        let mut queue = TaskQueue::new("player-1");
        queue.is_running = true;
        let calc = StandardRewardCalculator;
        let outcome = advance_queue(&mut queue, 1_000, &calc, &PlayerStats::default())
            .await
            .unwrap();
        assert!(outcome.changed);
        assert!(!queue.is_running);
    }
}
