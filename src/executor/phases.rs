//! Phase set for the ride-creation endpoint.
//!
//! A phase is one transactional step of the request state machine. It
//! receives the open phase transaction and the current key row, performs its
//! domain writes through that transaction, and returns what should be
//! committed alongside them: an advance, a terminal response, or a deferred
//! job. Side-effect calls that leave the database (the payment processor)
//! happen inside the phase, protected by the deterministic token the
//! processor deduplicates on.

use std::sync::Arc;

use async_trait::async_trait;
use diesel_async::AsyncPgConnection;
use serde_json::{json, Value};

use crate::domain::ports::{ChargeOutcome, ChargeReceipt, ChargeRequest, PaymentGateway};
use crate::domain::{Error, IdempotencyKey, RecoveryPoint, RideParams};
use crate::outbound::persistence::audit::{record_audit, AuditEntry};
use crate::outbound::persistence::outbox::enqueue_job;
use crate::outbound::persistence::rides::{attach_charge, create_ride, find_ride_for_key};

use super::ExecutorError;

/// Flat fare charged per ride, in cents.
const RIDE_FARE_CENTS: i64 = 20_00;
/// Fare currency.
const RIDE_FARE_CURRENCY: &str = "usd";
/// Outbox job kind for the staff receipt notification.
const RECEIPT_JOB_NAME: &str = "send_ride_receipt";
/// Audit action recorded when a ride row is created.
const AUDIT_RIDE_CREATED: &str = "ride.created";

const STATUS_CREATED: i32 = 201;
const STATUS_PAYMENT_REQUIRED: i32 = 402;
const STATUS_UNPROCESSABLE: i32 = 422;

/// A background job carried by [`PhaseOutcome::Defer`].
#[derive(Debug, Clone, PartialEq)]
pub struct StagedJob {
    /// Job kind understood by the external runner.
    pub name: String,
    /// Job payload.
    pub args: Value,
}

/// What a phase asks the atomic primitive to commit.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// Advance to the next recovery point.
    Advance(RecoveryPoint),
    /// Finish the key with a stored response and release the lease.
    Complete {
        /// HTTP status to store and replay.
        status: i32,
        /// JSON body to store and replay.
        body: Value,
    },
    /// Stage a background job and advance; the job row commits atomically
    /// with the recovery-point move.
    Defer {
        /// Job to insert into the outbox.
        job: StagedJob,
        /// Recovery point to advance to.
        next: RecoveryPoint,
    },
}

/// One transactional step of the request state machine.
///
/// Phases are first-class values: the executor resolves the phase for a
/// recovery point through a lookup table, so adding a recovery point means
/// registering a phase, not editing the loop.
#[async_trait]
pub trait Phase: Send + Sync {
    /// Stable name for logging.
    fn name(&self) -> &'static str;

    /// Perform the phase's work inside the open phase transaction.
    ///
    /// Errors roll the transaction back; transient ones are retried by the
    /// executor within the phase budget.
    async fn execute(
        &self,
        tx: &mut AsyncPgConnection,
        key: &IdempotencyKey,
    ) -> Result<PhaseOutcome, ExecutorError>;
}

/// Serialise a domain error as a storable response body.
fn error_body(error: &Error) -> Value {
    serde_json::to_value(error).unwrap_or_else(|_| {
        json!({"code": "internal_error", "message": "error body serialisation failed"})
    })
}

// ---------------------------------------------------------------------------
// started: create the ride row and its audit record
// ---------------------------------------------------------------------------

/// Phase run at `started`: validate the frozen parameters, create the ride
/// row (idempotent by key id), and append the audit record.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateRidePhase;

#[async_trait]
impl Phase for CreateRidePhase {
    fn name(&self) -> &'static str {
        "create_ride"
    }

    async fn execute(
        &self,
        tx: &mut AsyncPgConnection,
        key: &IdempotencyKey,
    ) -> Result<PhaseOutcome, ExecutorError> {
        let params = match RideParams::from_request_params(&key.request_params) {
            Ok(params) => params,
            Err(err) => {
                // Domain validation is a permanent failure: finish the key
                // so retries replay the rejection instead of re-validating.
                return Ok(PhaseOutcome::Complete {
                    status: STATUS_UNPROCESSABLE,
                    body: error_body(&Error::unprocessable(err.to_string())),
                });
            }
        };

        let ride = create_ride(tx, key.id, key.user_id, &params).await?;
        record_audit(
            tx,
            &AuditEntry {
                action: AUDIT_RIDE_CREATED,
                data: &key.request_params,
                resource_id: ride.id,
                resource_type: "ride",
                user_id: key.user_id,
            },
        )
        .await?;

        Ok(PhaseOutcome::Advance(RecoveryPoint::RideCreated))
    }
}

// ---------------------------------------------------------------------------
// ride_created: charge through the payment processor
// ---------------------------------------------------------------------------

/// Decision derived from the gateway call, separated from the transaction
/// work so it can be tested against a mocked gateway.
#[derive(Debug, Clone, PartialEq)]
enum ChargeDecision {
    Captured(ChargeReceipt),
    Denied { reason: String },
}

/// Phase run at `ride_created`: submit the charge with the key-derived
/// token and stamp the receipt onto the ride.
pub struct ChargePhase {
    gateway: Arc<dyn PaymentGateway>,
}

impl ChargePhase {
    /// Build the phase around a gateway implementation.
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { gateway }
    }

    async fn request_charge(&self, key: &IdempotencyKey) -> Result<ChargeDecision, ExecutorError> {
        let request = ChargeRequest {
            token: key.payment_token(),
            amount_cents: RIDE_FARE_CENTS,
            currency: RIDE_FARE_CURRENCY.to_owned(),
            user_id: key.user_id,
        };

        match self.gateway.charge(&request).await {
            Ok(ChargeOutcome::Captured(receipt)) => Ok(ChargeDecision::Captured(receipt)),
            Ok(ChargeOutcome::Declined { reason }) => Ok(ChargeDecision::Denied {
                reason: format!("charge declined: {reason}"),
            }),
            Err(err) if err.is_transient() => Err(ExecutorError::transient(err.to_string())),
            Err(err) => Ok(ChargeDecision::Denied {
                reason: format!("charge rejected: {err}"),
            }),
        }
    }
}

#[async_trait]
impl Phase for ChargePhase {
    fn name(&self) -> &'static str {
        "charge"
    }

    async fn execute(
        &self,
        tx: &mut AsyncPgConnection,
        key: &IdempotencyKey,
    ) -> Result<PhaseOutcome, ExecutorError> {
        match self.request_charge(key).await? {
            ChargeDecision::Captured(receipt) => {
                attach_charge(tx, key.id, &receipt.charge_id).await?;
                Ok(PhaseOutcome::Advance(RecoveryPoint::ChargeCreated))
            }
            ChargeDecision::Denied { reason } => Ok(PhaseOutcome::Complete {
                status: STATUS_PAYMENT_REQUIRED,
                body: error_body(&Error::payment_required(reason)),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// charge_created: stage the receipt notification and finish
// ---------------------------------------------------------------------------

/// Phase run at `charge_created`: stage the staff receipt job in the outbox
/// and finish the key with the ride as the stored response.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinalizeRidePhase;

#[async_trait]
impl Phase for FinalizeRidePhase {
    fn name(&self) -> &'static str {
        "finalize_ride"
    }

    async fn execute(
        &self,
        tx: &mut AsyncPgConnection,
        key: &IdempotencyKey,
    ) -> Result<PhaseOutcome, ExecutorError> {
        let ride = find_ride_for_key(tx, key.id).await?.ok_or_else(|| {
            ExecutorError::corruption(format!(
                "key {} reached charge_created without a ride",
                key.id
            ))
        })?;

        enqueue_job(
            tx,
            RECEIPT_JOB_NAME,
            &json!({
                "amount": RIDE_FARE_CENTS,
                "currency": RIDE_FARE_CURRENCY,
                "user_id": key.user_id,
            }),
        )
        .await?;

        let body = serde_json::to_value(&ride)
            .map_err(|err| ExecutorError::corruption(format!("ride serialisation failed: {err}")))?;

        Ok(PhaseOutcome::Complete {
            status: STATUS_CREATED,
            body,
        })
    }
}
