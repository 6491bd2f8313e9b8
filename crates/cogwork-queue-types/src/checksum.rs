//! Canonical checksum over a queue's stable subset.
//!
//! The subset covers: player id, current task id (or `null`), sorted queued
//! task ids, is_running, is_paused, and completion totals. The encoding is a
//! single line of `key=value` pairs joined by `&` in fixed lexicographic key
//! order with no whitespace; list values join with `,`. The digest is
//! lowercase hex SHA-256. Timestamps and version deliberately stay outside
//! the subset so a checksum survives routine re-saves of identical content.

use sha2::{Digest, Sha256};

use crate::queue::TaskQueue;

/// Stable textual encoding of the queue's canonical subset.
pub fn canonical_subset(queue: &TaskQueue) -> String {
    let current = queue
        .current_task
        .as_ref()
        .map(|t| t.id.as_str())
        .unwrap_or("null");

    let mut queued_ids: Vec<&str> = queue.queued_tasks.iter().map(|t| t.id.as_str()).collect();
    queued_ids.sort_unstable();

    // Keys in lexicographic order, no whitespace.
    format!(
        "current_task={}&is_paused={}&is_running={}&player_id={}&queued_tasks={}&tasks_completed={}&time_spent={}",
        current,
        queue.is_paused,
        queue.is_running,
        queue.player_id,
        queued_ids.join(","),
        queue.totals.tasks_completed,
        queue.totals.time_spent_ms,
    )
}

/// SHA-256 of the canonical subset, lowercase hex.
pub fn compute(queue: &TaskQueue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_subset(queue).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ActivityPayload, Task};

    fn task(id: &str) -> Task {
        let mut t = Task::new(
            "player-1",
            "Mine",
            10_000,
            ActivityPayload::Harvesting {
                activity_id: "copper-vein".to_string(),
                base_reward_rate: 10,
                primary_resource_id: "copper-ore".to_string(),
                rare_drop: None,
            },
        );
        t.id = id.to_string();
        t
    }

    #[test]
    fn test_subset_encoding_shape() {
        let mut queue = TaskQueue::new("player-1");
        queue.queued_tasks.push(task("b"));
        queue.queued_tasks.push(task("a"));
        let subset = canonical_subset(&queue);
        assert_eq!(
            subset,
            "current_task=null&is_paused=false&is_running=false&player_id=player-1&queued_tasks=a,b&tasks_completed=0&time_spent=0"
        );
    }

    #[test]
    fn test_checksum_independent_of_queued_order() {
        let mut forward = TaskQueue::new("player-1");
        forward.queued_tasks.push(task("a"));
        forward.queued_tasks.push(task("b"));

        let mut reverse = TaskQueue::new("player-1");
        reverse.queued_tasks.push(task("b"));
        reverse.queued_tasks.push(task("a"));

        assert_eq!(compute(&forward), compute(&reverse));
    }

    #[test]
    fn test_checksum_sensitive_to_stable_fields() {
        let queue = TaskQueue::new("player-1");
        let base = compute(&queue);

        let mut running = queue.clone();
        running.is_running = true;
        assert_ne!(compute(&running), base);

        let mut totals = queue.clone();
        totals.totals.tasks_completed = 1;
        assert_ne!(compute(&totals), base);
    }

    #[test]
    fn test_checksum_ignores_timestamps_and_version() {
        let queue = TaskQueue::new("player-1");
        let base = compute(&queue);

        let mut touched = queue.clone();
        touched.last_updated_ms += 99_999;
        touched.version += 7;
        assert_eq!(compute(&touched), base);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let queue = TaskQueue::new("player-1");
        let digest = compute(&queue);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
