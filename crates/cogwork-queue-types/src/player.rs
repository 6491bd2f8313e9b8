//! Player stat sheet consumed by the rewards callback.
//!
//! Skills live in a two-level map: an enumerated category, then a free-form
//! skill identifier inside it (`crafting_skills → clockmaking`). `BTreeMap`
//! keeps serialization order deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Enumerated skill categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatCategory {
    HarvestingSkills,
    CraftingSkills,
    CombatSkills,
}

impl StatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatCategory::HarvestingSkills => "harvesting_skills",
            StatCategory::CraftingSkills => "crafting_skills",
            StatCategory::CombatSkills => "combat_skills",
        }
    }
}

/// A player's stat sheet. Input to reward calculation; the engine itself
/// only threads it through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub level: u32,
    pub strength: u32,
    pub dexterity: u32,
    pub intelligence: u32,
    pub vitality: u32,
    /// category → skill id → level.
    pub skills: BTreeMap<StatCategory, BTreeMap<String, f64>>,
}

impl PlayerStats {
    pub fn with_level(level: u32) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Skill level inside a category; 0.0 when absent.
    pub fn skill(&self, category: StatCategory, skill: &str) -> f64 {
        self.skills
            .get(&category)
            .and_then(|skills| skills.get(skill))
            .copied()
            .unwrap_or(0.0)
    }

    /// Set a skill level, creating the category map if needed.
    pub fn set_skill(&mut self, category: StatCategory, skill: impl Into<String>, level: f64) {
        self.skills
            .entry(category)
            .or_default()
            .insert(skill.into(), level);
    }

    /// Add to a skill level, creating it at the delta if absent.
    pub fn add_skill(&mut self, category: StatCategory, skill: &str, delta: f64) {
        let entry = self
            .skills
            .entry(category)
            .or_default()
            .entry(skill.to_string())
            .or_insert(0.0);
        *entry += delta;
    }
}
