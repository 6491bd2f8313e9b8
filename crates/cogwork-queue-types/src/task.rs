//! Task persistence model.
//!
//! A `Task` is immutable after creation except for the execution fields the
//! scheduler owns (`start_time_ms`, `progress`, `completed`, `rewards`,
//! `retry_count`). Activity-specific data travels in a tagged
//! [`ActivityPayload`] that the core never interprets; only the injected
//! rewards callback dispatches on it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three task families the engine schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Harvesting,
    Crafting,
    Combat,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Harvesting => "harvesting",
            TaskType::Crafting => "crafting",
            TaskType::Combat => "combat",
        }
    }
}

/// A rare drop entry for harvesting activities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RareDrop {
    pub item_id: String,
    /// Drop chance per elapsed minute, in [0,1].
    pub chance_per_minute: f64,
}

/// Structured per-activity payload, tagged by task type.
///
/// Opaque to the core: queue and persistence logic never read these fields.
/// The rewards callback dispatches on the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "activity", rename_all = "snake_case")]
pub enum ActivityPayload {
    Harvesting {
        activity_id: String,
        /// Base reward units per elapsed minute.
        base_reward_rate: u64,
        primary_resource_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rare_drop: Option<RareDrop>,
    },
    Crafting {
        recipe_id: String,
        /// Skill category the recipe trains (e.g. "crafting_skills").
        category: String,
        /// Skill inside the category (e.g. "clockmaking").
        skill: String,
        quality_modifier: f64,
        material_ids: Vec<String>,
    },
    Combat {
        encounter_id: String,
        enemy_level: u32,
        player_attack: u32,
        player_defense: u32,
        loot_table_id: String,
    },
}

impl ActivityPayload {
    /// The task type this payload belongs to.
    pub fn task_type(&self) -> TaskType {
        match self {
            ActivityPayload::Harvesting { .. } => TaskType::Harvesting,
            ActivityPayload::Crafting { .. } => TaskType::Crafting,
            ActivityPayload::Combat { .. } => TaskType::Combat,
        }
    }
}

/// What a prerequisite gates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteKind {
    Level,
    Stat,
    Resource,
    Item,
}

/// A single prerequisite for starting a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPrerequisite {
    pub kind: PrerequisiteKind,
    pub name: String,
    pub required: f64,
    pub available: f64,
    pub met: bool,
}

/// A resource the task consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_id: String,
    pub required: u64,
    pub available: u64,
    pub sufficient: bool,
}

/// The kind of a reward entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Experience,
    Currency,
    Item,
    Resource,
}

/// A single accumulated reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReward {
    pub kind: RewardKind,
    pub quantity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl TaskReward {
    pub fn experience(quantity: u64) -> Self {
        Self {
            kind: RewardKind::Experience,
            quantity,
            item_id: None,
        }
    }

    pub fn currency(quantity: u64) -> Self {
        Self {
            kind: RewardKind::Currency,
            quantity,
            item_id: None,
        }
    }

    pub fn item(item_id: impl Into<String>, quantity: u64) -> Self {
        Self {
            kind: RewardKind::Item,
            quantity,
            item_id: Some(item_id.into()),
        }
    }

    pub fn resource(resource_id: impl Into<String>, quantity: u64) -> Self {
        Self {
            kind: RewardKind::Resource,
            quantity,
            item_id: Some(resource_id.into()),
        }
    }
}

/// Persistence model for a unit of work in a player's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID v7 for temporal ordering).
    pub id: String,
    pub task_type: TaskType,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Task duration in milliseconds. Must be positive.
    pub duration_ms: u64,
    /// Epoch milliseconds when the task started; 0 if not yet started.
    pub start_time_ms: i64,
    /// Owning player.
    pub player_id: String,
    /// Activity-specific payload, interpreted only by the rewards callback.
    pub payload: ActivityPayload,
    pub prerequisites: Vec<TaskPrerequisite>,
    pub resource_requirements: Vec<ResourceRequirement>,
    /// Completion fraction in [0,1]. Written only by the scheduler.
    pub progress: f64,
    pub completed: bool,
    /// Rewards accumulated on completion.
    pub rewards: Vec<TaskReward>,
    /// Higher priority runs sooner when priority handling is enabled.
    pub priority: i32,
    /// Estimated completion time, epoch milliseconds.
    pub estimated_completion_ms: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub valid: bool,
    pub validation_errors: Vec<String>,
}

impl Task {
    /// Create a task with defaults for the execution fields.
    pub fn new(
        player_id: impl Into<String>,
        name: impl Into<String>,
        duration_ms: u64,
        payload: ActivityPayload,
    ) -> Self {
        Self {
            id: Self::generate_id(),
            task_type: payload.task_type(),
            name: name.into(),
            description: String::new(),
            icon: String::new(),
            duration_ms,
            start_time_ms: 0,
            player_id: player_id.into(),
            payload,
            prerequisites: Vec::new(),
            resource_requirements: Vec::new(),
            progress: 0.0,
            completed: false,
            rewards: Vec::new(),
            priority: 0,
            estimated_completion_ms: 0,
            retry_count: 0,
            max_retries: 3,
            valid: true,
            validation_errors: Vec::new(),
        }
    }

    /// Generate a new task ID using UUID v7 (temporal ordering).
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_prerequisite(mut self, prerequisite: TaskPrerequisite) -> Self {
        self.prerequisites.push(prerequisite);
        self
    }

    pub fn with_resource_requirement(mut self, requirement: ResourceRequirement) -> Self {
        self.resource_requirements.push(requirement);
        self
    }

    /// Whether the task has started.
    pub fn started(&self) -> bool {
        self.start_time_ms > 0
    }

    /// Structural validation errors for this task. Empty means valid.
    ///
    /// Prerequisite and resource checks are business rules, not validation;
    /// they are enforced separately at add time.
    pub fn validation_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.id.is_empty() {
            issues.push("task id is empty".to_string());
        }
        if self.player_id.is_empty() {
            issues.push("player id is empty".to_string());
        }
        if self.name.is_empty() {
            issues.push("task name is empty".to_string());
        }
        if self.duration_ms == 0 {
            issues.push("duration must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.progress) {
            issues.push(format!("progress {} outside [0,1]", self.progress));
        }
        if self.payload.task_type() != self.task_type {
            issues.push(format!(
                "payload tag {:?} does not match task type {:?}",
                self.payload.task_type(),
                self.task_type
            ));
        }
        issues
    }

    /// First unmet prerequisite, if any.
    pub fn unmet_prerequisite(&self) -> Option<&TaskPrerequisite> {
        self.prerequisites.iter().find(|p| !p.met)
    }

    /// First insufficient resource requirement, if any.
    pub fn insufficient_resource(&self) -> Option<&ResourceRequirement> {
        self.resource_requirements.iter().find(|r| !r.sufficient)
    }
}
