//! The request executor: drives a locked key to `finished`.
//!
//! Given an acquired key, the executor resolves the phase for the current
//! recovery point through its lookup table and runs it through the atomic
//! phase primitive, retrying transient failures within a bounded budget,
//! until the key is finished and the stored response can be returned.
//! Transitions are strictly forward; the durable recovery point is the only
//! source of truth about what has already happened.

pub mod atomic;
pub mod phases;

use std::sync::Arc;

use diesel_async::AsyncPgConnection;
use mockable::Clock;
use tracing::{debug, error, warn};

use crate::config::IdempotencyConfig;
use crate::domain::ports::{
    PaymentGateway, RequestResolution, RequestTelemetry, RiderScope, TelemetryError,
};
use crate::domain::{ApiResult, Error, IdempotencyKey, RecoveryPoint, StoredResponse};
use crate::outbound::persistence::key_store::KeyStoreError;
use crate::outbound::persistence::lock::{acquire_key, release_key, AcquireError, AcquireRequest, Acquisition};

pub use atomic::run_atomic_phase;
pub use phases::{ChargePhase, CreateRidePhase, FinalizeRidePhase, Phase, PhaseOutcome, StagedJob};

/// Attempts at winning an insert race before giving up; each attempt re-runs
/// the full acquire transaction and observes the winner's committed row.
const ACQUIRE_RACE_MAX_RETRIES: u32 = 5;

/// Errors internal to the executor, classified for retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// The attempt may succeed if re-run (serialisation conflict, network
    /// blip, processor shed load).
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// Storage failed in a way a retry will not fix.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// The durable state contradicts the data model; the key is left
    /// untouched.
    #[error("state corruption: {message}")]
    Corruption { message: String },
}

impl ExecutorError {
    /// Create a transient error with the given message.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a storage error with the given message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a corruption error with the given message.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Whether re-running the failed attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<KeyStoreError> for ExecutorError {
    fn from(error: KeyStoreError) -> Self {
        match &error {
            KeyStoreError::Serialization { .. } | KeyStoreError::Connection { .. } => {
                ExecutorError::transient(error.to_string())
            }
            KeyStoreError::Corrupted { .. } | KeyStoreError::InvalidUpdate(_) => {
                ExecutorError::corruption(error.to_string())
            }
            KeyStoreError::NotFound | KeyStoreError::Conflict { .. } | KeyStoreError::Query { .. } => {
                ExecutorError::storage(error.to_string())
            }
        }
    }
}

impl From<diesel::result::Error> for ExecutorError {
    fn from(error: diesel::result::Error) -> Self {
        KeyStoreError::from(error).into()
    }
}

/// The request state machine.
///
/// One instance serves all requests; per-request state lives in the key row
/// and the caller's connection.
pub struct RequestExecutor {
    telemetry: Arc<dyn RequestTelemetry>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
    phases: Vec<(RecoveryPoint, Arc<dyn Phase>)>,
}

impl RequestExecutor {
    /// Build the executor with the ride endpoint's phase table.
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        telemetry: Arc<dyn RequestTelemetry>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
    ) -> Self {
        let phases: Vec<(RecoveryPoint, Arc<dyn Phase>)> = vec![
            (RecoveryPoint::Started, Arc::new(CreateRidePhase)),
            (
                RecoveryPoint::RideCreated,
                Arc::new(ChargePhase::new(gateway)),
            ),
            (RecoveryPoint::ChargeCreated, Arc::new(FinalizeRidePhase)),
        ];
        Self {
            telemetry,
            clock,
            config,
            phases,
        }
    }

    /// Resolve the phase registered for a recovery point.
    fn phase_for(&self, point: RecoveryPoint) -> Option<Arc<dyn Phase>> {
        self.phases
            .iter()
            .find(|(registered, _)| *registered == point)
            .map(|(_, phase)| Arc::clone(phase))
    }

    /// Handle one inbound idempotent request end to end: acquire (or
    /// replay), execute phases until finished, and return the stored
    /// response.
    pub async fn run_request(
        &self,
        conn: &mut AsyncPgConnection,
        request: AcquireRequest,
    ) -> ApiResult<StoredResponse> {
        let rider = RiderScope::from_user_id(request.user_id);

        let acquisition = match self.acquire_with_retries(conn, &request).await {
            Ok(acquisition) => acquisition,
            Err(err) => {
                match &err {
                    AcquireError::RequestMismatch => {
                        self.record(
                            self.telemetry
                                .request_resolved(&rider, &RequestResolution::MismatchRejected)
                                .await,
                        );
                    }
                    AcquireError::Locked { .. } => {
                        self.record(
                            self.telemetry
                                .request_resolved(&rider, &RequestResolution::LockContended)
                                .await,
                        );
                    }
                    AcquireError::Store(_) => {}
                }
                return Err(acquire_error_response(err));
            }
        };

        if acquisition.replay {
            debug!(
                key_id = acquisition.key.id,
                "replaying stored response for finished key"
            );
            self.record(
                self.telemetry
                    .request_resolved(&rider, &RequestResolution::Replayed)
                    .await,
            );
            return stored_response(&acquisition.key).map_err(executor_error_response);
        }

        self.record(
            self.telemetry
                .request_resolved(
                    &rider,
                    &RequestResolution::Executed {
                        resumed_from: acquisition.key.recovery_point,
                    },
                )
                .await,
        );
        self.execute(conn, acquisition.key)
            .await
            .map_err(executor_error_response)
    }

    /// Run phases until the key is finished, then return its stored
    /// response.
    pub async fn execute(
        &self,
        conn: &mut AsyncPgConnection,
        mut key: IdempotencyKey,
    ) -> Result<StoredResponse, ExecutorError> {
        loop {
            if key.is_finished() {
                return stored_response(&key);
            }

            let phase = self.phase_for(key.recovery_point).ok_or_else(|| {
                ExecutorError::corruption(format!(
                    "no phase registered for recovery point {}",
                    key.recovery_point
                ))
            })?;

            key = self.run_phase(conn, key, phase.as_ref()).await?;
        }
    }

    /// Run one phase with the transient retry budget.
    ///
    /// On exhaustion the lease is released so a follow-up request can
    /// resume immediately; the recovery point is left untouched.
    async fn run_phase(
        &self,
        conn: &mut AsyncPgConnection,
        key: IdempotencyKey,
        phase: &dyn Phase,
    ) -> Result<IdempotencyKey, ExecutorError> {
        let max_attempts = self.config.phase_max_attempts();
        let mut attempt = 1u32;
        loop {
            let now = self.clock.utc();
            match run_atomic_phase(conn, now, &key, phase).await {
                Ok(updated) => return Ok(updated),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        key_id = key.id,
                        phase = phase.name(),
                        attempt,
                        error = %err,
                        "phase attempt failed; backing off"
                    );
                    self.record(
                        self.telemetry
                            .phase_retried(
                                &RiderScope::from_user_id(key.user_id),
                                phase.name(),
                                attempt,
                            )
                            .await,
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(
                            key_id = key.id,
                            phase = phase.name(),
                            attempts = attempt,
                            error = %err,
                            "phase retry budget exhausted; releasing lease"
                        );
                        if let Err(release_err) =
                            release_key(conn, self.clock.utc(), key.id).await
                        {
                            warn!(
                                key_id = key.id,
                                error = %release_err,
                                "failed to release lease after exhaustion"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Run the acquire protocol, re-running it when this request loses an
    /// insert race or a serialisation conflict: the next run observes the
    /// winner's committed row and takes the replay or locked branch.
    async fn acquire_with_retries(
        &self,
        conn: &mut AsyncPgConnection,
        request: &AcquireRequest,
    ) -> Result<Acquisition, AcquireError> {
        let mut attempt = 1u32;
        loop {
            let now = self.clock.utc();
            match acquire_key(conn, now, &self.config, request).await {
                Err(AcquireError::Store(err))
                    if acquire_retriable(&err) && attempt <= ACQUIRE_RACE_MAX_RETRIES =>
                {
                    debug!(
                        user_id = request.user_id,
                        key = %request.key,
                        attempt,
                        error = %err,
                        "acquire lost a race; re-running"
                    );
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn record(&self, result: Result<(), TelemetryError>) {
        if let Err(err) = result {
            warn!(error = %err, "failed to record request telemetry");
        }
    }
}

fn acquire_retriable(error: &KeyStoreError) -> bool {
    matches!(
        error,
        KeyStoreError::Conflict { .. } | KeyStoreError::Serialization { .. }
    )
}

/// Extract the stored response of a finished key, treating missing response
/// columns as corruption.
fn stored_response(key: &IdempotencyKey) -> Result<StoredResponse, ExecutorError> {
    key.stored_response().ok_or_else(|| {
        ExecutorError::corruption(format!(
            "finished key {} is missing its stored response",
            key.id
        ))
    })
}

fn acquire_error_response(error: AcquireError) -> Error {
    match error {
        AcquireError::RequestMismatch => {
            Error::conflict("idempotency key was used with a different request")
        }
        AcquireError::Locked { .. } => {
            Error::conflict("an earlier request with this idempotency key is still in progress")
        }
        AcquireError::Store(err) => store_error_response(err),
    }
}

fn store_error_response(error: KeyStoreError) -> Error {
    match &error {
        KeyStoreError::Serialization { .. }
        | KeyStoreError::Connection { .. }
        | KeyStoreError::Conflict { .. } => {
            warn!(error = %error, "storage contention surfaced to caller");
            Error::service_unavailable(
                "the request could not be completed; retry with the same idempotency key",
            )
        }
        _ => {
            error!(error = %error, "key store failure");
            Error::internal("Internal server error")
        }
    }
}

fn executor_error_response(error: ExecutorError) -> Error {
    match &error {
        ExecutorError::Transient { .. } => {
            warn!(error = %error, "phase retry budget exhausted");
            Error::service_unavailable(
                "the request could not be completed; retry with the same idempotency key",
            )
        }
        ExecutorError::Storage { .. } => {
            error!(error = %error, "storage failure during execution");
            Error::internal("Internal server error")
        }
        ExecutorError::Corruption { .. } => {
            error!(error = %error, "idempotency state corruption");
            Error::internal("Internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{FixturePaymentGateway, NoOpRequestTelemetry};
    use crate::domain::ErrorCode;
    use chrono::Utc;
    use mockable::DefaultClock;
    use rstest::rstest;
    use serde_json::json;

    fn executor() -> RequestExecutor {
        RequestExecutor::new(
            Arc::new(FixturePaymentGateway),
            Arc::new(NoOpRequestTelemetry),
            Arc::new(DefaultClock),
            IdempotencyConfig::default(),
        )
    }

    fn finished_key() -> IdempotencyKey {
        IdempotencyKey {
            id: 738,
            created_at: Utc::now(),
            user_id: 123,
            key: "testKeyFinished".to_owned(),
            request_method: "POST".to_owned(),
            request_path: "/rides".to_owned(),
            request_params: json!({}),
            last_run_at: Utc::now(),
            locked_at: None,
            recovery_point: RecoveryPoint::Finished,
            response_code: Some(201),
            response_body: Some(json!({})),
        }
    }

    #[test]
    fn phase_table_covers_every_non_terminal_recovery_point() {
        let executor = executor();
        for point in RecoveryPoint::ALL {
            let phase = executor.phase_for(point);
            if point == RecoveryPoint::Finished {
                assert!(phase.is_none(), "finished has no phase");
            } else {
                assert!(phase.is_some(), "missing phase for {point}");
            }
        }
    }

    #[test]
    fn phase_table_matches_the_canonical_order() {
        let executor = executor();
        let registered: Vec<RecoveryPoint> =
            executor.phases.iter().map(|(point, _)| *point).collect();
        assert_eq!(
            registered,
            vec![
                RecoveryPoint::Started,
                RecoveryPoint::RideCreated,
                RecoveryPoint::ChargeCreated,
            ]
        );
    }

    #[rstest]
    #[case(KeyStoreError::serialization("conflict"), true)]
    #[case(KeyStoreError::connection("reset"), true)]
    #[case(KeyStoreError::query("syntax"), false)]
    #[case(KeyStoreError::corrupted("bad tag"), false)]
    fn store_errors_classify_for_retry(#[case] error: KeyStoreError, #[case] transient: bool) {
        let executor_error = ExecutorError::from(error);
        assert_eq!(executor_error.is_transient(), transient);
    }

    #[test]
    fn corrupted_rows_map_to_corruption() {
        let err = ExecutorError::from(KeyStoreError::corrupted("unknown recovery point"));
        assert!(matches!(err, ExecutorError::Corruption { .. }));
    }

    #[test]
    fn stored_response_demands_both_columns() {
        let key = finished_key();
        let response = stored_response(&key).expect("finished key replays");
        assert_eq!(response.status, 201);
        assert_eq!(response.body, json!({}));

        let mut broken = finished_key();
        broken.response_body = None;
        let err = stored_response(&broken).expect_err("missing body is corruption");
        assert!(matches!(err, ExecutorError::Corruption { .. }));
    }

    #[rstest]
    #[case(AcquireError::RequestMismatch)]
    #[case(AcquireError::Locked { locked_at: Utc::now() })]
    fn duplicate_rejections_surface_as_conflicts(#[case] error: AcquireError) {
        let response = acquire_error_response(error);
        assert_eq!(response.code(), ErrorCode::Conflict);
    }

    #[test]
    fn transient_exhaustion_surfaces_as_service_unavailable() {
        let response = executor_error_response(ExecutorError::transient("serialisation conflict"));
        assert_eq!(response.code(), ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn corruption_surfaces_as_internal_error() {
        let response = executor_error_response(ExecutorError::corruption("unknown tag"));
        assert_eq!(response.code(), ErrorCode::InternalError);
    }

    #[rstest]
    #[case(KeyStoreError::conflict("insert race"), true)]
    #[case(KeyStoreError::serialization("conflict"), true)]
    #[case(KeyStoreError::NotFound, false)]
    #[case(KeyStoreError::query("boom"), false)]
    fn acquire_retries_races_only(#[case] error: KeyStoreError, #[case] retriable: bool) {
        assert_eq!(acquire_retriable(&error), retriable);
    }
}
