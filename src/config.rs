//! Configuration for the idempotency executor.

use std::time::Duration;

const DEFAULT_LEASE_TTL_SECONDS: u64 = 90;
const DEFAULT_PHASE_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_PHASE_BACKOFF_BASE_MS: u64 = 50;

/// Tuning knobs of the request state machine.
///
/// # Example
///
/// ```
/// use rides_backend::config::IdempotencyConfig;
///
/// let config = IdempotencyConfig::default()
///     .with_lease_ttl_seconds(120)
///     .with_phase_max_attempts(3);
/// assert_eq!(config.phase_max_attempts(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    lease_ttl_seconds: u64,
    phase_max_attempts: u32,
    phase_backoff_base_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: DEFAULT_LEASE_TTL_SECONDS,
            phase_max_attempts: DEFAULT_PHASE_MAX_ATTEMPTS,
            phase_backoff_base_ms: DEFAULT_PHASE_BACKOFF_BASE_MS,
        }
    }
}

impl IdempotencyConfig {
    /// Set how long a held lock may age before another request may steal the
    /// key. Must exceed the longest expected phase by a safety margin.
    pub fn with_lease_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lease_ttl_seconds = seconds;
        self
    }

    /// Set how many transient attempts each phase is allowed before the
    /// failure surfaces to the caller.
    pub fn with_phase_max_attempts(mut self, attempts: u32) -> Self {
        self.phase_max_attempts = attempts.max(1);
        self
    }

    /// Set the initial backoff between transient attempts; doubles per retry.
    pub fn with_phase_backoff_base_ms(mut self, millis: u64) -> Self {
        self.phase_backoff_base_ms = millis;
        self
    }

    /// Lease time-to-live as a chrono duration for lease arithmetic.
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_seconds as i64)
    }

    /// Transient attempts allowed per phase (always at least one).
    pub fn phase_max_attempts(&self) -> u32 {
        self.phase_max_attempts.max(1)
    }

    /// Delay before re-running a phase after transient attempt `attempt`
    /// (1-based) failed: `base * 2^(attempt - 1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.phase_backoff_base_ms.saturating_mul(1 << exponent))
    }
}
