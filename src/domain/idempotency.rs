//! Idempotency primitives for exactly-once request execution.
//!
//! This module provides the durable request state machine's domain types:
//!
//! - [`RecoveryPoint`]: closed enumeration of how far a request has
//!   progressed; persisted as a short string and rejected at read when
//!   unknown.
//! - [`IdempotencyKey`]: the stored key row linking a client-supplied token
//!   to its frozen request, lease, progress marker, and stored response.
//! - [`KeyParams`]: payload for inserting a fresh key.
//! - [`KeyUpdate`] / [`validate_update`]: the mutable-field update contract
//!   and its invariant checks (response discipline, terminal immutability,
//!   monotonic progress).
//!
//! # Request comparison
//!
//! A retry must carry the same request as the original submission. Stored
//! parameters are canonicalised (object keys sorted recursively) before the
//! comparison so semantically equal bodies replay instead of conflicting.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// RecoveryPoint
// ---------------------------------------------------------------------------

/// Raised when a persisted recovery-point tag is not one of the known set.
///
/// An unknown tag means the row was written by something other than this
/// state machine and must be treated as data corruption, not skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recovery point tag: {tag}")]
pub struct UnknownRecoveryPoint {
    /// The offending persisted tag.
    pub tag: String,
}

/// Durable marker of how far a request has progressed.
///
/// The set is closed and ordered; a key only ever moves forward along it
/// (or jumps straight to [`RecoveryPoint::Finished`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryPoint {
    /// Key inserted; no side effects performed yet.
    Started,
    /// The ride row and its audit record are committed.
    RideCreated,
    /// The payment processor accepted the charge.
    ChargeCreated,
    /// Terminal: the stored response is authoritative.
    Finished,
}

impl RecoveryPoint {
    /// All recovery points in canonical execution order.
    pub const ALL: [RecoveryPoint; 4] = [
        RecoveryPoint::Started,
        RecoveryPoint::RideCreated,
        RecoveryPoint::ChargeCreated,
        RecoveryPoint::Finished,
    ];

    /// Short string persisted in the `recovery_point` column.
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryPoint::Started => "started",
            RecoveryPoint::RideCreated => "ride_created",
            RecoveryPoint::ChargeCreated => "charge_created",
            RecoveryPoint::Finished => "finished",
        }
    }

    /// Position in the canonical order; used for monotonicity checks.
    fn ordinal(self) -> u8 {
        match self {
            RecoveryPoint::Started => 0,
            RecoveryPoint::RideCreated => 1,
            RecoveryPoint::ChargeCreated => 2,
            RecoveryPoint::Finished => 3,
        }
    }

    /// Whether moving from `self` to `next` respects monotonic progress.
    ///
    /// Re-committing the same point is permitted (a phase may update other
    /// mutable fields without advancing); moving backwards is not.
    pub fn permits_transition_to(self, next: RecoveryPoint) -> bool {
        next.ordinal() >= self.ordinal()
    }
}

impl fmt::Display for RecoveryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryPoint {
    type Err = UnknownRecoveryPoint;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "started" => Ok(RecoveryPoint::Started),
            "ride_created" => Ok(RecoveryPoint::RideCreated),
            "charge_created" => Ok(RecoveryPoint::ChargeCreated),
            "finished" => Ok(RecoveryPoint::Finished),
            other => Err(UnknownRecoveryPoint {
                tag: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonicalisation
// ---------------------------------------------------------------------------

/// Recursively sort object keys for a canonical JSON representation.
///
/// Arrays preserve element order; scalars pass through. Two semantically
/// equal payloads canonicalise to identical values regardless of the key
/// order the client happened to send.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| *k);
            let canonical_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(canonical_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// IdempotencyKey
// ---------------------------------------------------------------------------

/// Response stored on a finished key, replayed verbatim to later retries.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    /// HTTP status of the original outcome.
    pub status: i32,
    /// JSON body of the original outcome.
    pub body: Value,
}

/// The stored idempotency-key row.
///
/// Created by the first request bearing a new `(user_id, key)`; mutated only
/// by the executor holding its lease; never deleted by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyKey {
    /// Surrogate row id.
    pub id: i64,
    /// Insertion time (server-assigned).
    pub created_at: DateTime<Utc>,
    /// Owning principal; scope of key uniqueness.
    pub user_id: i64,
    /// Client-supplied opaque token, unique per user.
    pub key: String,
    /// HTTP method frozen at insert.
    pub request_method: String,
    /// URL path frozen at insert.
    pub request_path: String,
    /// Canonicalised request parameters frozen at insert.
    pub request_params: Value,
    /// Updated on each phase commit.
    pub last_run_at: DateTime<Utc>,
    /// Non-null while an executor holds (or abandoned) the lease.
    pub locked_at: Option<DateTime<Utc>>,
    /// Progress marker.
    pub recovery_point: RecoveryPoint,
    /// Set exactly when `recovery_point` is finished.
    pub response_code: Option<i32>,
    /// Set exactly when `recovery_point` is finished.
    pub response_body: Option<Value>,
}

impl IdempotencyKey {
    /// Whether the key has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.recovery_point == RecoveryPoint::Finished
    }

    /// Whether the inbound request matches the frozen request fields.
    ///
    /// `params` is compared after canonicalisation so key-order differences
    /// do not count as a mismatch.
    pub fn matches_request(&self, method: &str, path: &str, params: &Value) -> bool {
        self.request_method == method
            && self.request_path == path
            && self.request_params == canonicalize(params)
    }

    /// Whether a held lease is old enough to be reclaimed.
    ///
    /// A key without a lease is not expired, it is simply free.
    pub fn lease_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => now - locked_at > ttl,
            None => false,
        }
    }

    /// The stored response of a finished key.
    ///
    /// Returns `None` when the key is unfinished, or when a finished row is
    /// missing either response column (a broken invariant the caller must
    /// treat as corruption).
    pub fn stored_response(&self) -> Option<StoredResponse> {
        if !self.is_finished() {
            return None;
        }
        match (self.response_code, self.response_body.as_ref()) {
            (Some(status), Some(body)) => Some(StoredResponse {
                status,
                body: body.clone(),
            }),
            _ => None,
        }
    }

    /// Deterministic idempotency token passed to the payment processor.
    ///
    /// Derived from the key row alone (owner and client token), never from
    /// wall-clock or per-request values, so a crash-retry of the charge
    /// phase presents the same token and cannot charge twice.
    ///
    /// # Example
    ///
    /// ```
    /// # use rides_backend::domain::idempotency::payment_token;
    /// assert_eq!(payment_token(123, "awesomeKey"), payment_token(123, "awesomeKey"));
    /// assert_ne!(payment_token(123, "awesomeKey"), payment_token(124, "awesomeKey"));
    /// ```
    pub fn payment_token(&self) -> String {
        payment_token(self.user_id, &self.key)
    }
}

/// See [`IdempotencyKey::payment_token`].
pub fn payment_token(user_id: i64, key: &str) -> String {
    let digest = Sha256::digest(format!("{user_id}:{key}").as_bytes());
    format!("ride-{}", hex::encode(&digest[..16]))
}

// ---------------------------------------------------------------------------
// KeyParams / KeyUpdate
// ---------------------------------------------------------------------------

/// Payload for inserting a fresh idempotency key.
///
/// The insert itself stamps `recovery_point = started`, takes the lease, and
/// leaves the response columns null.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyParams {
    /// Client-supplied opaque token.
    pub key: String,
    /// HTTP method of the original request.
    pub request_method: String,
    /// URL path of the original request.
    pub request_path: String,
    /// Request parameters; canonicalised before storage.
    pub request_params: Value,
    /// Owning principal.
    pub user_id: i64,
}

/// Update of a key's mutable fields.
///
/// Frozen request fields have no representation here, so they cannot change
/// after insert. The response is an all-or-nothing pair by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyUpdate {
    /// New recovery point, when advancing.
    pub recovery_point: Option<RecoveryPoint>,
    /// Lease change: `Some(None)` releases, `Some(Some(t))` re-stamps,
    /// `None` leaves the column untouched.
    pub locked_at: Option<Option<DateTime<Utc>>>,
    /// New `last_run_at`, stamped on every phase commit.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Stored response; only legal together with a move to `finished`.
    pub response: Option<StoredResponse>,
}

/// Rejected [`KeyUpdate`]s, named for the invariant they would break.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyUpdateError {
    /// The key is finished and therefore immutable.
    #[error("idempotency key {id} is finished and cannot be updated")]
    Terminal {
        /// Row id of the finished key.
        id: i64,
    },
    /// The update moves the recovery point backwards.
    #[error("recovery point may not regress from {from} to {to}")]
    Regression {
        /// Current recovery point.
        from: RecoveryPoint,
        /// Requested recovery point.
        to: RecoveryPoint,
    },
    /// A response was supplied without finishing the key.
    #[error("a stored response requires the key to move to finished")]
    ResponseWithoutFinish,
    /// The key was moved to finished without a stored response.
    #[error("finishing a key requires a stored response")]
    FinishWithoutResponse,
}

/// Validate an update against the current row before touching storage.
///
/// Enforces terminal immutability, response-column discipline, and monotonic
/// recovery-point progress.
pub fn validate_update(current: &IdempotencyKey, update: &KeyUpdate) -> Result<(), KeyUpdateError> {
    if current.is_finished() {
        return Err(KeyUpdateError::Terminal { id: current.id });
    }

    let target = update.recovery_point.unwrap_or(current.recovery_point);
    if let Some(next) = update.recovery_point {
        if !current.recovery_point.permits_transition_to(next) {
            return Err(KeyUpdateError::Regression {
                from: current.recovery_point,
                to: next,
            });
        }
    }

    let finishing = target == RecoveryPoint::Finished;
    match (finishing, update.response.is_some()) {
        (true, false) => Err(KeyUpdateError::FinishWithoutResponse),
        (false, true) => Err(KeyUpdateError::ResponseWithoutFinish),
        _ => Ok(()),
    }
}
