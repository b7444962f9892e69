//! Port for observing how idempotent requests resolve.
//!
//! The executor reports two things: the terminal resolution of each request
//! (executed from some recovery point, replayed, or rejected as a
//! duplicate) and every transient phase retry it spends. Implementations
//! may export counters, log structured events, or discard the reports in
//! tests; failures to record never affect the request.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::RecoveryPoint;

/// Errors raised when a telemetry write cannot be recorded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    /// The telemetry sink rejected the write.
    #[error("telemetry sink rejected the write: {message}")]
    Sink { message: String },
}

impl TelemetryError {
    /// Create a sink error with the given message.
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

/// Anonymised rider scope attached to every telemetry write.
///
/// Raw user ids never reach the sink; the scope is the first 8 hex
/// characters of the SHA-256 of the id, stable enough to aggregate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiderScope(String);

impl RiderScope {
    /// Derive the scope for a rider.
    pub fn from_user_id(user_id: i64) -> Self {
        let digest = Sha256::digest(user_id.to_string().as_bytes());
        Self(hex::encode(&digest[..4]))
    }

    /// The anonymised scope label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How an idempotent request resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResolution {
    /// A lease was taken and phases ran, starting from this recovery
    /// point: `started` for a fresh key, a later point when the request
    /// resumed work an earlier one left behind.
    Executed {
        /// Recovery point the executor picked up from.
        resumed_from: RecoveryPoint,
    },
    /// A finished key replayed its stored response; no phase ran.
    Replayed,
    /// The key was presented with different request fields and rejected.
    MismatchRejected,
    /// A live lease blocked the duplicate request.
    LockContended,
}

/// Telemetry port for the request state machine.
#[async_trait]
pub trait RequestTelemetry: Send + Sync {
    /// Record the terminal resolution of one request.
    async fn request_resolved(
        &self,
        rider: &RiderScope,
        resolution: &RequestResolution,
    ) -> Result<(), TelemetryError>;

    /// Record one transient retry of a phase (`attempt` is the attempt that
    /// just failed, 1-based).
    async fn phase_retried(
        &self,
        rider: &RiderScope,
        phase: &'static str,
        attempt: u32,
    ) -> Result<(), TelemetryError>;
}

/// Sink that discards every report; the default outside production.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRequestTelemetry;

#[async_trait]
impl RequestTelemetry for NoOpRequestTelemetry {
    async fn request_resolved(
        &self,
        _rider: &RiderScope,
        _resolution: &RequestResolution,
    ) -> Result<(), TelemetryError> {
        Ok(())
    }

    async fn phase_retried(
        &self,
        _rider: &RiderScope,
        _phase: &'static str,
        _attempt: u32,
    ) -> Result<(), TelemetryError> {
        Ok(())
    }
}
