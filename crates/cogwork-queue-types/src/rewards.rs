//! Rewards contract between the engine and the domain layer.
//!
//! The engine never computes rewards itself. Online completion and offline
//! reconciliation both call the same injected [`RewardCalculator`], which is
//! how the two paths stay observationally equivalent: the callback MUST be a
//! deterministic function of its inputs (fix any stochastic rolls with a
//! seed derived from those inputs).

use async_trait::async_trait;

use crate::error::EngineError;
use crate::player::PlayerStats;
use crate::task::{ActivityPayload, TaskReward, TaskType};

/// Domain-supplied reward rules, dispatched on the activity payload tag.
#[async_trait]
pub trait RewardCalculator: Send + Sync {
    /// Compute the rewards for `elapsed_minutes` of the given activity.
    ///
    /// MUST be deterministic in `(task_type, payload, elapsed_minutes,
    /// stats)`.
    async fn compute_rewards(
        &self,
        task_type: TaskType,
        payload: &ActivityPayload,
        elapsed_minutes: u64,
        stats: &PlayerStats,
    ) -> Result<Vec<TaskReward>, EngineError>;
}

/// Domain-supplied lookup for a player's current stat sheet.
///
/// The scheduler and offline reconciler fetch stats through this seam so
/// reward computation sees the live sheet without the core owning it.
#[async_trait]
pub trait PlayerStatsProvider: Send + Sync {
    async fn stats(&self, player_id: &str) -> Result<PlayerStats, EngineError>;
}

/// Stats provider returning an empty default sheet for every player.
#[derive(Debug, Clone, Default)]
pub struct DefaultStatsProvider;

#[async_trait]
impl PlayerStatsProvider for DefaultStatsProvider {
    async fn stats(&self, _player_id: &str) -> Result<PlayerStats, EngineError> {
        Ok(PlayerStats::default())
    }
}

/// Reference calculator implementing the standard idle formulas.
///
/// Harvesting: `experience = ⌊minutes · base_rate · (1 + skill_level · 0.1)⌋`
/// plus one primary-resource unit per minute and deterministic rare drops.
/// Crafting: experience scaled by the quality modifier. Combat: experience
/// scaled by enemy level against player attack.
#[derive(Debug, Clone, Default)]
pub struct StandardRewardCalculator;

#[async_trait]
impl RewardCalculator for StandardRewardCalculator {
    async fn compute_rewards(
        &self,
        task_type: TaskType,
        payload: &ActivityPayload,
        elapsed_minutes: u64,
        stats: &PlayerStats,
    ) -> Result<Vec<TaskReward>, EngineError> {
        if payload.task_type() != task_type {
            return Err(EngineError::InvalidTask(format!(
                "payload tag {:?} does not match task type {:?}",
                payload.task_type(),
                task_type
            )));
        }
        if elapsed_minutes == 0 {
            return Ok(Vec::new());
        }

        let mut rewards = Vec::new();
        match payload {
            ActivityPayload::Harvesting {
                base_reward_rate,
                primary_resource_id,
                rare_drop,
                ..
            } => {
                let multiplier = 1.0 + stats.level as f64 * 0.1;
                let experience =
                    (elapsed_minutes as f64 * *base_reward_rate as f64 * multiplier).floor() as u64;
                rewards.push(TaskReward::experience(experience));
                rewards.push(TaskReward::resource(
                    primary_resource_id.clone(),
                    elapsed_minutes,
                ));
                if let Some(drop) = rare_drop {
                    let quantity =
                        (elapsed_minutes as f64 * drop.chance_per_minute).floor() as u64;
                    if quantity > 0 {
                        rewards.push(TaskReward::item(drop.item_id.clone(), quantity));
                    }
                }
            }
            ActivityPayload::Crafting {
                quality_modifier, ..
            } => {
                let experience =
                    (elapsed_minutes as f64 * 8.0 * quality_modifier.max(0.0)).floor() as u64;
                rewards.push(TaskReward::experience(experience));
                rewards.push(TaskReward::currency(elapsed_minutes * 2));
            }
            ActivityPayload::Combat {
                enemy_level,
                player_attack,
                ..
            } => {
                let advantage =
                    (*player_attack as f64 / (*enemy_level as f64 * 10.0).max(1.0)).min(2.0);
                let experience =
                    (elapsed_minutes as f64 * 12.0 * *enemy_level as f64 * advantage).floor()
                        as u64;
                rewards.push(TaskReward::experience(experience));
                rewards.push(TaskReward::currency(
                    elapsed_minutes * *enemy_level as u64,
                ));
            }
        }
        Ok(rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{RareDrop, RewardKind};

    fn harvesting(base_rate: u64) -> ActivityPayload {
        ActivityPayload::Harvesting {
            activity_id: "copper-vein".to_string(),
            base_reward_rate: base_rate,
            primary_resource_id: "copper-ore".to_string(),
            rare_drop: None,
        }
    }

    #[tokio::test]
    async fn test_harvesting_formula() {
        // 90 minutes, base rate 10, level 10: ⌊90·10·(1 + 10·0.1)⌋ = 1800
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::with_level(10);
        let rewards = calc
            .compute_rewards(TaskType::Harvesting, &harvesting(10), 90, &stats)
            .await
            .unwrap();
        assert_eq!(rewards[0].kind, RewardKind::Experience);
        assert_eq!(rewards[0].quantity, 1800);
        assert_eq!(rewards[1].kind, RewardKind::Resource);
        assert_eq!(rewards[1].quantity, 90);
    }

    #[tokio::test]
    async fn test_determinism() {
        let calc = StandardRewardCalculator;
        let stats = PlayerStats::with_level(7);
        let payload = ActivityPayload::Combat {
            encounter_id: "rust-golem".to_string(),
            enemy_level: 4,
            player_attack: 30,
            player_defense: 12,
            loot_table_id: "golem-scraps".to_string(),
        };
        let first = calc
            .compute_rewards(TaskType::Combat, &payload, 45, &stats)
            .await
            .unwrap();
        let second = calc
            .compute_rewards(TaskType::Combat, &payload, 45, &stats)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_zero_minutes_yields_nothing() {
        let calc = StandardRewardCalculator;
        let rewards = calc
            .compute_rewards(
                TaskType::Harvesting,
                &harvesting(10),
                0,
                &PlayerStats::default(),
            )
            .await
            .unwrap();
        assert!(rewards.is_empty());
    }

    #[tokio::test]
    async fn test_rare_drop_is_deterministic() {
        let calc = StandardRewardCalculator;
        let payload = ActivityPayload::Harvesting {
            activity_id: "gem-seam".to_string(),
            base_reward_rate: 5,
            primary_resource_id: "raw-gem".to_string(),
            rare_drop: Some(RareDrop {
                item_id: "flawless-gem".to_string(),
                chance_per_minute: 0.05,
            }),
        };
        let rewards = calc
            .compute_rewards(TaskType::Harvesting, &payload, 60, &PlayerStats::default())
            .await
            .unwrap();
        // ⌊60 · 0.05⌋ = 3 deterministic drops
        let drop = rewards
            .iter()
            .find(|r| r.kind == RewardKind::Item)
            .unwrap();
        assert_eq!(drop.quantity, 3);
        assert_eq!(drop.item_id.as_deref(), Some("flawless-gem"));
    }

    #[tokio::test]
    async fn test_payload_mismatch_rejected() {
        let calc = StandardRewardCalculator;
        let result = calc
            .compute_rewards(
                TaskType::Combat,
                &harvesting(10),
                10,
                &PlayerStats::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
