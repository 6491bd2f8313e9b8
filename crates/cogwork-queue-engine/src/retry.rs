//! Retry with exponential backoff and per-(player, operation) circuit
//! breakers.
//!
//! The breaker protects a failing downstream (usually the backing store)
//! from retry storms: five consecutive failures open the circuit, open
//! circuits fail fast for sixty seconds, then a half-open probe window of
//! three trial calls decides between closing and reopening.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use cogwork_queue_types::EngineError;

/// Operation families tracked by separate breakers per player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Save,
    Load,
    Snapshot,
    Recovery,
    Reconcile,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Save => "save",
            OperationKind::Load => "load",
            OperationKind::Snapshot => "snapshot",
            OperationKind::Recovery => "recovery",
            OperationKind::Reconcile => "reconcile",
        }
    }
}

/// Breaker states: CLOSED → OPEN → HALF_OPEN → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Backoff and breaker tuning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts per `execute` call (first try included).
    pub max_attempts: u32,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit rejects calls before probing.
    pub open_timeout: Duration,
    /// Trial calls allowed while half-open.
    pub half_open_max: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_max: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerCell {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Instant,
    half_open_trials: u32,
}

impl BreakerCell {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: Instant::now(),
            half_open_trials: 0,
        }
    }
}

/// Retry controller with one circuit breaker per (player, operation).
pub struct RetryController {
    policy: RetryPolicy,
    breakers: Mutex<HashMap<(String, OperationKind), BreakerCell>>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff for the given attempt (1-based): `base · 2^(attempt−1)`
    /// capped at `max_delay`, jittered ±20%.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .policy
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.policy.max_delay);
        let jitter = rand::rng().random_range(0.8..=1.2);
        raw.mul_f64(jitter)
    }

    /// Admission check. Fails fast with `SYS_CIRCUIT_OPEN` when the breaker
    /// rejects the call; a passing check in half-open state consumes one
    /// trial slot.
    pub fn guard(&self, player_id: &str, operation: OperationKind) -> Result<(), EngineError> {
        let mut breakers = self.breakers.lock();
        let cell = breakers
            .entry((player_id.to_string(), operation))
            .or_insert_with(BreakerCell::new);

        match cell.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = cell.opened_at.elapsed();
                if elapsed >= self.policy.open_timeout {
                    debug!(
                        player_id = %player_id,
                        operation = operation.as_str(),
                        "Circuit half-open; allowing trial call"
                    );
                    cell.state = CircuitState::HalfOpen;
                    cell.half_open_trials = 1;
                    Ok(())
                } else {
                    let remaining = self.policy.open_timeout - elapsed;
                    Err(EngineError::CircuitOpen {
                        time_until_retry_ms: remaining.as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if cell.half_open_trials < self.policy.half_open_max {
                    cell.half_open_trials += 1;
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen {
                        time_until_retry_ms: self.policy.open_timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Record a successful call: closes a half-open circuit, clears the
    /// failure streak.
    pub fn on_success(&self, player_id: &str, operation: OperationKind) {
        let mut breakers = self.breakers.lock();
        if let Some(cell) = breakers.get_mut(&(player_id.to_string(), operation)) {
            if cell.state != CircuitState::Closed {
                debug!(
                    player_id = %player_id,
                    operation = operation.as_str(),
                    "Circuit closed after successful call"
                );
            }
            cell.state = CircuitState::Closed;
            cell.consecutive_failures = 0;
            cell.half_open_trials = 0;
        }
    }

    /// Record a failed call: opens the circuit at the failure threshold and
    /// reopens (timer reset) on any half-open failure.
    pub fn on_failure(&self, player_id: &str, operation: OperationKind) {
        let mut breakers = self.breakers.lock();
        let cell = breakers
            .entry((player_id.to_string(), operation))
            .or_insert_with(BreakerCell::new);

        match cell.state {
            CircuitState::Closed => {
                cell.consecutive_failures += 1;
                if cell.consecutive_failures >= self.policy.failure_threshold {
                    warn!(
                        player_id = %player_id,
                        operation = operation.as_str(),
                        failures = cell.consecutive_failures,
                        "Circuit opened"
                    );
                    cell.state = CircuitState::Open;
                    cell.opened_at = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    player_id = %player_id,
                    operation = operation.as_str(),
                    "Circuit reopened by half-open failure"
                );
                cell.state = CircuitState::Open;
                cell.opened_at = Instant::now();
                cell.half_open_trials = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current breaker state for inspection.
    pub fn state(&self, player_id: &str, operation: OperationKind) -> CircuitState {
        let breakers = self.breakers.lock();
        breakers
            .get(&(player_id.to_string(), operation))
            .map(|cell| cell.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Run `operation` with breaker admission, failure accounting, and
    /// backoff retries for errors whose policy recommends retrying.
    pub async fn execute<T, F, Fut>(
        &self,
        player_id: &str,
        kind: OperationKind,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.guard(player_id, kind)?;

            match operation().await {
                Ok(value) => {
                    self.on_success(player_id, kind);
                    return Ok(value);
                }
                Err(err) => {
                    self.on_failure(player_id, kind);
                    if !err.retry_recommended() || attempt >= self.policy.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        player_id = %player_id,
                        operation = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_with_cap_and_jitter() {
        let controller = RetryController::default();
        for attempt in 1..=6u32 {
            let nominal = Duration::from_millis(100) * (1u32 << (attempt - 1));
            let delay = controller.backoff_delay(attempt);
            assert!(delay >= nominal.mul_f64(0.8), "attempt {}", attempt);
            assert!(delay <= nominal.mul_f64(1.2), "attempt {}", attempt);
        }
        // Far past the cap, jitter stays within ±20% of max_delay
        let capped = controller.backoff_delay(12);
        assert!(capped <= Duration::from_secs(30).mul_f64(1.2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_five_consecutive_failures() {
        let controller = RetryController::default();
        for _ in 0..4 {
            controller.on_failure("player-1", OperationKind::Save);
            assert_eq!(
                controller.state("player-1", OperationKind::Save),
                CircuitState::Closed
            );
        }
        controller.on_failure("player-1", OperationKind::Save);
        assert_eq!(
            controller.state("player-1", OperationKind::Save),
            CircuitState::Open
        );

        // Sixth call fails fast with the remaining open window
        match controller.guard("player-1", OperationKind::Save) {
            Err(EngineError::CircuitOpen {
                time_until_retry_ms,
            }) => {
                assert!(time_until_retry_ms <= 60_000);
                assert!(time_until_retry_ms > 59_000);
            }
            other => panic!("Expected CircuitOpen, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_half_opens_after_timeout_then_closes() {
        let controller = RetryController::default();
        for _ in 0..5 {
            controller.on_failure("player-1", OperationKind::Save);
        }
        assert!(controller.guard("player-1", OperationKind::Save).is_err());

        tokio::time::advance(Duration::from_secs(60)).await;

        // First admitted call is a half-open trial
        controller.guard("player-1", OperationKind::Save).unwrap();
        assert_eq!(
            controller.state("player-1", OperationKind::Save),
            CircuitState::HalfOpen
        );

        controller.on_success("player-1", OperationKind::Save);
        assert_eq!(
            controller.state("player-1", OperationKind::Save),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timer() {
        let controller = RetryController::default();
        for _ in 0..5 {
            controller.on_failure("player-1", OperationKind::Save);
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        controller.guard("player-1", OperationKind::Save).unwrap();

        controller.on_failure("player-1", OperationKind::Save);
        assert_eq!(
            controller.state("player-1", OperationKind::Save),
            CircuitState::Open
        );

        // Timer restarted: still rejecting just before the fresh window ends
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(controller.guard("player-1", OperationKind::Save).is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(controller.guard("player-1", OperationKind::Save).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_bounded_trials() {
        let controller = RetryController::default();
        for _ in 0..5 {
            controller.on_failure("player-1", OperationKind::Save);
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        for _ in 0..3 {
            controller.guard("player-1", OperationKind::Save).unwrap();
        }
        assert!(matches!(
            controller.guard("player-1", OperationKind::Save),
            Err(EngineError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_breakers_are_keyed_per_player_and_operation() {
        let controller = RetryController::default();
        for _ in 0..5 {
            controller.on_failure("player-1", OperationKind::Save);
        }
        assert_eq!(
            controller.state("player-1", OperationKind::Save),
            CircuitState::Open
        );
        // Unrelated keys stay closed
        assert!(controller.guard("player-2", OperationKind::Save).is_ok());
        assert!(controller.guard("player-1", OperationKind::Load).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_retryable_errors() {
        let controller = RetryController::default();
        let calls = AtomicU32::new(0);

        let result = controller
            .execute("player-1", OperationKind::Save, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EngineError::NetworkTimeout("flaky".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_validation_errors() {
        let controller = RetryController::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), EngineError> = controller
            .execute("player-1", OperationKind::Save, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::InvalidTask("bad duration".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
