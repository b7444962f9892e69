//! Persistence gateway for idempotency-key rows.
//!
//! Every operation takes the caller's open transaction and inherits its
//! isolation, so the executor can compose key updates with domain writes
//! inside one atomic commit. Nothing here opens or commits transactions.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::{
    canonicalize, validate_update, IdempotencyKey, KeyParams, KeyUpdate, KeyUpdateError,
    RecoveryPoint,
};

use super::models::{IdempotencyKeyRow, KeyRowChanges, NewIdempotencyKeyRow};
use super::schema::idempotency_keys;

/// Errors raised by key-store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    /// No row exists for the requested key.
    #[error("idempotency key not found")]
    NotFound,

    /// A row for `(user_id, key)` already exists; callers convert this into
    /// a find.
    #[error("idempotency key already exists: {message}")]
    Conflict { message: String },

    /// The transaction lost a serialisation conflict and may be re-run.
    #[error("serialisation failure: {message}")]
    Serialization { message: String },

    /// The database connection failed mid-operation.
    #[error("key store connection failed: {message}")]
    Connection { message: String },

    /// Query or mutation failed during execution.
    #[error("key store query failed: {message}")]
    Query { message: String },

    /// The stored row violates the data model (unknown recovery point).
    #[error("key store row is corrupt: {message}")]
    Corrupted { message: String },

    /// The requested update would break a key invariant.
    #[error(transparent)]
    InvalidUpdate(#[from] KeyUpdateError),
}

impl KeyStoreError {
    /// Create a conflict error with the given message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a serialisation error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a connection error with the given message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error with the given message.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a corruption error with the given message.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl From<diesel::result::Error> for KeyStoreError {
    fn from(error: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        match &error {
            DieselError::DatabaseError(kind, info) => {
                debug!(?kind, message = info.message(), "diesel operation failed");
            }
            DieselError::NotFound => {}
            _ => debug!(
                error_type = %std::any::type_name_of_val(&error),
                "diesel operation failed"
            ),
        }

        match error {
            DieselError::NotFound => KeyStoreError::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => {
                    KeyStoreError::conflict("concurrent insert detected")
                }
                DatabaseErrorKind::SerializationFailure => {
                    KeyStoreError::serialization(info.message().to_owned())
                }
                DatabaseErrorKind::ClosedConnection => {
                    KeyStoreError::connection("database connection error")
                }
                _ => KeyStoreError::query("database error"),
            },
            _ => KeyStoreError::query("database error"),
        }
    }
}

/// Convert a database row to a domain key, rejecting unknown recovery
/// points as corruption.
fn row_to_key(row: IdempotencyKeyRow) -> Result<IdempotencyKey, KeyStoreError> {
    let recovery_point: RecoveryPoint = row
        .recovery_point
        .parse()
        .map_err(|err| KeyStoreError::corrupted(format!("key {}: {err}", row.id)))?;

    Ok(IdempotencyKey {
        id: row.id,
        created_at: row.created_at,
        user_id: row.user_id,
        key: row.idempotency_key,
        request_method: row.request_method,
        request_path: row.request_path,
        request_params: row.request_params,
        last_run_at: row.last_run_at,
        locked_at: row.locked_at,
        recovery_point,
        response_code: row.response_code,
        response_body: row.response_body,
    })
}

/// Look up a key by its owner and client token.
///
/// No locking beyond what the surrounding transaction provides.
pub async fn find_key(
    conn: &mut AsyncPgConnection,
    user_id: i64,
    key: &str,
) -> Result<IdempotencyKey, KeyStoreError> {
    let row: Option<IdempotencyKeyRow> = idempotency_keys::table
        .filter(
            idempotency_keys::user_id
                .eq(user_id)
                .and(idempotency_keys::idempotency_key.eq(key)),
        )
        .select(IdempotencyKeyRow::as_select())
        .first(conn)
        .await
        .optional()?;

    row.map(row_to_key).ok_or(KeyStoreError::NotFound)?
}

/// Insert a fresh key at `started`, taking the lease in the same statement.
///
/// Request parameters are canonicalised before storage so later mismatch
/// checks compare stable forms. Fails with [`KeyStoreError::Conflict`] when
/// `(user_id, key)` already exists.
pub async fn insert_key(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    params: &KeyParams,
) -> Result<IdempotencyKey, KeyStoreError> {
    let canonical_params = canonicalize(&params.request_params);
    let new_row = NewIdempotencyKeyRow {
        created_at: now,
        idempotency_key: &params.key,
        last_run_at: now,
        locked_at: Some(now),
        request_method: &params.request_method,
        request_params: &canonical_params,
        request_path: &params.request_path,
        recovery_point: RecoveryPoint::Started.as_str(),
        user_id: params.user_id,
    };

    let row: IdempotencyKeyRow = diesel::insert_into(idempotency_keys::table)
        .values(&new_row)
        .returning(IdempotencyKeyRow::as_returning())
        .get_result(conn)
        .await?;

    row_to_key(row)
}

/// Update a key's mutable fields by primary key, returning the post-update
/// row.
///
/// The current row is re-read inside the caller's transaction and the
/// update validated against it, so invariant checks see the state this
/// commit will build on. Frozen request fields are not updatable by
/// construction.
pub async fn update_key(
    conn: &mut AsyncPgConnection,
    key_id: i64,
    update: &KeyUpdate,
) -> Result<IdempotencyKey, KeyStoreError> {
    let current_row: IdempotencyKeyRow = idempotency_keys::table
        .find(key_id)
        .select(IdempotencyKeyRow::as_select())
        .first(conn)
        .await?;
    let current = row_to_key(current_row)?;

    validate_update(&current, update)?;

    let changes = KeyRowChanges {
        recovery_point: update.recovery_point.map(|point| point.as_str().to_owned()),
        last_run_at: update.last_run_at,
        locked_at: update.locked_at,
        response_code: update.response.as_ref().map(|resp| Some(resp.status)),
        response_body: update.response.as_ref().map(|resp| Some(resp.body.clone())),
    };
    if changes.is_noop() {
        return Ok(current);
    }

    let row: IdempotencyKeyRow = diesel::update(idempotency_keys::table.find(key_id))
        .set(&changes)
        .returning(IdempotencyKeyRow::as_returning())
        .get_result(conn)
        .await?;

    row_to_key(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn not_found_maps_to_not_found() {
        let err = KeyStoreError::from(diesel::result::Error::NotFound);
        assert_eq!(err, KeyStoreError::NotFound);
    }

    #[rstest]
    fn unique_violation_maps_to_conflict() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let diesel_err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        );
        let err = KeyStoreError::from(diesel_err);

        assert!(
            matches!(err, KeyStoreError::Conflict { .. }),
            "expected Conflict, got {err:?}"
        );
    }

    #[rstest]
    fn serialization_failure_maps_to_serialization() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let diesel_err = DieselError::DatabaseError(
            DatabaseErrorKind::SerializationFailure,
            Box::new("could not serialize access".to_string()),
        );
        let err = KeyStoreError::from(diesel_err);

        assert!(
            matches!(err, KeyStoreError::Serialization { .. }),
            "expected Serialization, got {err:?}"
        );
        assert!(err.to_string().contains("could not serialize access"));
    }

    #[rstest]
    fn other_database_errors_map_to_query() {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let diesel_err = DieselError::DatabaseError(
            DatabaseErrorKind::CheckViolation,
            Box::new("response_fields_all_or_nothing".to_string()),
        );
        let err = KeyStoreError::from(diesel_err);

        assert!(matches!(err, KeyStoreError::Query { .. }));
    }

    #[test]
    fn invalid_update_wraps_domain_error() {
        let err = KeyStoreError::from(KeyUpdateError::FinishWithoutResponse);
        assert_eq!(
            err.to_string(),
            "finishing a key requires a stored response"
        );
    }
}
