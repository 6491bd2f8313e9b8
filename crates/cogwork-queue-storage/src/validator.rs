//! Queue integrity validation and bounded repair.
//!
//! Validation classifies corruption into coded issues with severities;
//! repair maps each repairable issue to a bounded action. Critical issues
//! (a record with no player id) are never repaired automatically; they
//! surface as `PER_QUEUE_UNREPAIRABLE` and fall to the recovery pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use cogwork_queue_types::{QueueEventKind, TaskQueue, checksum};

/// Tolerated forward clock skew before `last_updated` counts as future.
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 5_000;

/// Issue severity. `Minor` issues are warnings; `Major` and `Critical` are
/// errors. Only `Critical` blocks repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// Stable codes for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MissingPlayerId,
    ChecksumMismatch,
    FutureTimestamp,
    OrphanedCurrentTask,
    DuplicateTaskIds,
    QueueSizeExceeded,
    HistorySizeExceeded,
    NegativeStats,
}

impl IssueCode {
    pub fn severity(&self) -> Severity {
        match self {
            IssueCode::MissingPlayerId => Severity::Critical,
            IssueCode::ChecksumMismatch
            | IssueCode::OrphanedCurrentTask
            | IssueCode::DuplicateTaskIds
            | IssueCode::NegativeStats => Severity::Major,
            IssueCode::FutureTimestamp
            | IssueCode::QueueSizeExceeded
            | IssueCode::HistorySizeExceeded => Severity::Minor,
        }
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.severity(),
            message: message.into(),
        }
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// `max(0, 100 − 20·errors − 5·warnings)`.
    pub integrity_score: u32,
    /// True when no critical issue is present.
    pub can_repair: bool,
    pub validated_at_ms: i64,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity >= Severity::Major)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Minor)
    }

    pub fn has_critical(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Bounded repair actions, each mapped from one or more issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    UpdateChecksum,
    FixTimestamps,
    RemoveInvalidTask,
    RecalculateStats,
    ResetState,
    TrimHistory,
}

/// Run all integrity checks against a queue.
pub fn check(queue: &TaskQueue) -> ValidationReport {
    let now = Utc::now().timestamp_millis();
    let mut issues = Vec::new();

    if queue.player_id.is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::MissingPlayerId,
            "queue record has an empty player id",
        ));
    }

    if !queue.checksum_valid() {
        issues.push(ValidationIssue::new(
            IssueCode::ChecksumMismatch,
            "stored checksum does not match computed checksum",
        ));
    }

    if queue.last_updated_ms > now + CLOCK_SKEW_TOLERANCE_MS {
        issues.push(ValidationIssue::new(
            IssueCode::FutureTimestamp,
            format!(
                "last_updated {}ms ahead of local clock",
                queue.last_updated_ms - now
            ),
        ));
    }

    match &queue.current_task {
        Some(current) => {
            let duplicated = queue.queued_tasks.iter().any(|t| t.id == current.id);
            if duplicated || current.player_id != queue.player_id || current.completed {
                issues.push(ValidationIssue::new(
                    IssueCode::OrphanedCurrentTask,
                    format!("current task {} is not self-consistent", current.id),
                ));
            }
        }
        None => {
            if queue.is_running {
                issues.push(ValidationIssue::new(
                    IssueCode::OrphanedCurrentTask,
                    "queue is marked running with no current task",
                ));
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    for task in &queue.queued_tasks {
        if !seen.insert(task.id.as_str()) {
            issues.push(ValidationIssue::new(
                IssueCode::DuplicateTaskIds,
                format!("task id {} appears more than once", task.id),
            ));
        }
    }

    if queue.queued_tasks.len() > queue.config.max_queue_size {
        issues.push(ValidationIssue::new(
            IssueCode::QueueSizeExceeded,
            format!(
                "{} queued tasks exceed the bound of {}",
                queue.queued_tasks.len(),
                queue.config.max_queue_size
            ),
        ));
    }

    if queue.state_history.len() > queue.config.max_history_size {
        issues.push(ValidationIssue::new(
            IssueCode::HistorySizeExceeded,
            format!(
                "{} history entries exceed the bound of {}",
                queue.state_history.len(),
                queue.config.max_history_size
            ),
        ));
    }

    if queue.totals.tasks_completed < 0
        || queue.totals.time_spent_ms < 0
        || queue.total_pause_time_ms < 0
    {
        issues.push(ValidationIssue::new(
            IssueCode::NegativeStats,
            "a lifetime counter is negative",
        ));
    }

    let errors = issues
        .iter()
        .filter(|i| i.severity >= Severity::Major)
        .count() as u32;
    let warnings = issues
        .iter()
        .filter(|i| i.severity == Severity::Minor)
        .count() as u32;
    let integrity_score = 100u32.saturating_sub(20 * errors + 5 * warnings);
    let can_repair = !issues
        .iter()
        .any(|i| i.severity == Severity::Critical);

    ValidationReport {
        issues,
        integrity_score,
        can_repair,
        validated_at_ms: now,
    }
}

/// Apply bounded repair actions for every repairable issue in `report`.
///
/// Returns the actions applied, in order. The caller persists the repaired
/// queue; the save bumps `version`. Never panics: a report with critical
/// issues simply yields no actions.
pub fn repair(queue: &mut TaskQueue, report: &ValidationReport) -> Vec<RepairAction> {
    if !report.can_repair {
        warn!(
            player_id = %queue.player_id,
            "Refusing to repair a queue with critical issues"
        );
        return Vec::new();
    }

    let now = Utc::now().timestamp_millis();
    let mut actions = Vec::new();

    if report.has_issue(IssueCode::FutureTimestamp) {
        queue.last_updated_ms = queue.last_updated_ms.min(now);
        queue.last_synced_ms = queue.last_synced_ms.min(now);
        actions.push(RepairAction::FixTimestamps);
    }

    if report.has_issue(IssueCode::DuplicateTaskIds) {
        let mut seen = std::collections::HashSet::new();
        queue.queued_tasks.retain(|t| seen.insert(t.id.clone()));
        actions.push(RepairAction::RemoveInvalidTask);
    }

    if report.has_issue(IssueCode::QueueSizeExceeded) {
        queue.queued_tasks.truncate(queue.config.max_queue_size);
        actions.push(RepairAction::RemoveInvalidTask);
    }

    if report.has_issue(IssueCode::OrphanedCurrentTask) {
        queue.current_task = None;
        queue.is_running = false;
        actions.push(RepairAction::ResetState);
    }

    if report.has_issue(IssueCode::NegativeStats) {
        queue.totals.tasks_completed = queue.totals.tasks_completed.max(0);
        queue.totals.time_spent_ms = queue.totals.time_spent_ms.max(0);
        queue.total_pause_time_ms = queue.total_pause_time_ms.max(0);
        actions.push(RepairAction::RecalculateStats);
    }

    if report.has_issue(IssueCode::HistorySizeExceeded) {
        let bound = queue.config.max_history_size.max(1);
        if queue.state_history.len() > bound {
            let excess = queue.state_history.len() - bound;
            queue.state_history.drain(..excess);
        }
        actions.push(RepairAction::TrimHistory);
    }

    // Checksum is recomputed last so it covers every repair above.
    queue.refresh_checksum();
    if report.has_issue(IssueCode::ChecksumMismatch) || !actions.is_empty() {
        actions.push(RepairAction::UpdateChecksum);
    }
    queue.last_validated_ms = now;
    queue.push_history(
        QueueEventKind::Repaired,
        None,
        Some(format!("{} repair actions", actions.len())),
    );

    actions
}

/// Convenience: recompute the checksum the validator checks against.
pub fn expected_checksum(queue: &TaskQueue) -> String {
    checksum::compute(queue)
}
