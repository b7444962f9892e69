//! Domain primitives and aggregates.
//!
//! Purpose: define the strongly typed entities of the idempotency core —
//! keys, recovery points, rides — together with the invariants the
//! persistence and executor layers enforce. Types here are framework-free;
//! adapters map them to rows, JSON, and HTTP.

pub mod error;
pub mod idempotency;
pub mod ports;
pub mod ride;

pub use self::error::{Error, ErrorCode};
pub use self::idempotency::{
    canonicalize, payment_token, validate_update, IdempotencyKey, KeyParams, KeyUpdate,
    KeyUpdateError, RecoveryPoint, StoredResponse, UnknownRecoveryPoint,
};
pub use self::ride::{Ride, RideParams, RideValidationError};

/// Convenient API result alias.
pub type ApiResult<T> = Result<T, Error>;
