//! Unified error taxonomy for the queue engine.
//!
//! Every externally-visible operation returns `Result<T, EngineError>`. Each
//! variant maps to a stable machine code in one of the families `NET_`,
//! `VAL_`, `PER_`, `BUS_`, `SYS_`, `SEC_`, `RES_`, `TIM_`, plus a retry
//! recommendation and suggested user actions.

/// Unified error type for engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    // === NET: transport/store connectivity ===
    #[error("Connection to backing store failed: {0}")]
    ConnectionFailed(String),

    #[error("Store operation timed out: {0}")]
    NetworkTimeout(String),

    #[error("Store throttled the request: {0}")]
    Throttled(String),

    // === VAL: input validation ===
    #[error("Task failed validation: {0}")]
    InvalidTask(String),

    #[error("Queue is full: {size} of {max} tasks")]
    QueueFull { size: usize, max: usize },

    #[error("Task duration {duration_ms}ms exceeds maximum {max_ms}ms")]
    TaskTooLong { duration_ms: u64, max_ms: u64 },

    #[error("Total queue duration {total_ms}ms exceeds maximum {max_ms}ms")]
    TotalDurationExceeded { total_ms: u64, max_ms: u64 },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // === PER: persistence ===
    #[error("Version conflict while saving queue for player {0}")]
    VersionConflict(String),

    #[error("Stored checksum does not match computed checksum for player {0}")]
    ChecksumMismatch(String),

    #[error("Queue for player {0} is corrupted beyond repair")]
    QueueUnrepairable(String),

    #[error("Save retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Queue not found for player {0}")]
    QueueNotFound(String),

    // === BUS: business rules ===
    #[error("Queue is already paused")]
    AlreadyPaused,

    #[error("Queue is not paused")]
    NotPaused,

    #[error("Queue was paused without resume permission; use force to override")]
    ResumeForbidden,

    #[error("Prerequisite not met: {0}")]
    PrerequisiteNotMet(String),

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("No migration path from schema version {from} to {to}")]
    PlanImpossible { from: u32, to: u32 },

    // === SYS: internal ===
    #[error("Circuit breaker is open; retry in {time_until_retry_ms}ms")]
    CircuitOpen { time_until_retry_ms: u64 },

    #[error("Internal engine error: {0}")]
    Internal(String),

    // === SEC ===
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // === RES: resource pressure ===
    #[error("System overloaded; request refused")]
    SystemOverloaded,

    // === TIM ===
    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(String),
}

impl EngineError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "NET_CONNECTION_FAILED",
            Self::NetworkTimeout(_) => "NET_TIMEOUT",
            Self::Throttled(_) => "NET_THROTTLED",
            Self::InvalidTask(_) => "VAL_INVALID_TASK",
            Self::QueueFull { .. } => "VAL_QUEUE_FULL",
            Self::TaskTooLong { .. } => "VAL_TASK_TOO_LONG",
            Self::TotalDurationExceeded { .. } => "VAL_TOTAL_DURATION_EXCEEDED",
            Self::ConfigInvalid(_) => "VAL_CONFIG_INVALID",
            Self::VersionConflict(_) => "PER_VERSION_CONFLICT",
            Self::ChecksumMismatch(_) => "PER_CHECKSUM_MISMATCH",
            Self::QueueUnrepairable(_) => "PER_QUEUE_UNREPAIRABLE",
            Self::RetriesExhausted(_) => "PER_RETRIES_EXHAUSTED",
            Self::QueueNotFound(_) => "PER_QUEUE_NOT_FOUND",
            Self::AlreadyPaused => "BUS_ALREADY_PAUSED",
            Self::NotPaused => "BUS_NOT_PAUSED",
            Self::ResumeForbidden => "BUS_RESUME_FORBIDDEN",
            Self::PrerequisiteNotMet(_) => "BUS_PREREQUISITE_NOT_MET",
            Self::InsufficientResources(_) => "BUS_INSUFFICIENT_RESOURCES",
            Self::PlanImpossible { .. } => "BUS_PLAN_IMPOSSIBLE",
            Self::CircuitOpen { .. } => "SYS_CIRCUIT_OPEN",
            Self::Internal(_) => "SYS_INTERNAL",
            Self::Unauthorized(_) => "SEC_UNAUTHORIZED",
            Self::SystemOverloaded => "RES_SYSTEM_OVERLOADED",
            Self::DeadlineExceeded(_) => "TIM_DEADLINE_EXCEEDED",
        }
    }

    /// Whether the caller should retry the operation.
    ///
    /// NET and TIM errors retry with backoff; version conflicts retry after
    /// reload. VAL, BUS, and SEC errors never retry.
    pub fn retry_recommended(&self) -> bool {
        match self {
            Self::ConnectionFailed(_)
            | Self::NetworkTimeout(_)
            | Self::Throttled(_)
            | Self::VersionConflict(_)
            | Self::DeadlineExceeded(_) => true,
            Self::Internal(_) => true,
            Self::InvalidTask(_)
            | Self::QueueFull { .. }
            | Self::TaskTooLong { .. }
            | Self::TotalDurationExceeded { .. }
            | Self::ConfigInvalid(_)
            | Self::ChecksumMismatch(_)
            | Self::QueueUnrepairable(_)
            | Self::RetriesExhausted(_)
            | Self::QueueNotFound(_)
            | Self::AlreadyPaused
            | Self::NotPaused
            | Self::ResumeForbidden
            | Self::PrerequisiteNotMet(_)
            | Self::InsufficientResources(_)
            | Self::PlanImpossible { .. }
            | Self::CircuitOpen { .. }
            | Self::Unauthorized(_)
            | Self::SystemOverloaded => false,
        }
    }

    /// Suggested user-facing actions for surfaced errors.
    pub fn suggested_actions(&self) -> &'static [&'static str] {
        match self {
            Self::ConnectionFailed(_) | Self::NetworkTimeout(_) | Self::Throttled(_) => {
                &["Wait and retry", "Check your connection"]
            }
            Self::InvalidTask(_) | Self::TaskTooLong { .. } => &["Check task parameters"],
            Self::QueueFull { .. } | Self::TotalDurationExceeded { .. } => {
                &["Remove queued tasks and try again"]
            }
            Self::ConfigInvalid(_) => &["Check configuration values"],
            Self::VersionConflict(_) | Self::RetriesExhausted(_) => &["Refresh and try again"],
            Self::ChecksumMismatch(_) | Self::QueueUnrepairable(_) | Self::Internal(_) => {
                &["Contact support if this persists"]
            }
            Self::QueueNotFound(_) => &["Refresh and try again"],
            Self::AlreadyPaused | Self::NotPaused | Self::ResumeForbidden => {
                &["Check queue state before pausing or resuming"]
            }
            Self::PrerequisiteNotMet(_) | Self::InsufficientResources(_) => {
                &["Check requirements"]
            }
            Self::PlanImpossible { .. } => &["Register the missing migration step"],
            Self::CircuitOpen { .. } | Self::SystemOverloaded => &["Wait and retry"],
            Self::Unauthorized(_) => &["Sign in again"],
            Self::DeadlineExceeded(_) => &["Retry with a longer deadline"],
        }
    }

    /// Two-letter-plus family prefix of the machine code (e.g. `"PER"`).
    pub fn family(&self) -> &'static str {
        let code = self.code();
        match code.split('_').next() {
            Some(family) => match family {
                "NET" => "NET",
                "VAL" => "VAL",
                "PER" => "PER",
                "BUS" => "BUS",
                "SYS" => "SYS",
                "SEC" => "SEC",
                "RES" => "RES",
                _ => "TIM",
            },
            None => "SYS",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("serialization error: {}", err))
    }
}
