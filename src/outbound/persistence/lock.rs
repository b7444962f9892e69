//! Lock manager: at-most-one concurrent executor per idempotency key.
//!
//! The acquire protocol runs in one short serialisable transaction: find or
//! insert the key, validate the frozen request fields against the inbound
//! request, then either take the lease, steal an expired one, replay a
//! finished key, or reject the duplicate. The `locked_at` column plus the
//! lease TTL is the entire locking mechanism; a crashed executor's lease
//! becomes reclaimable once it ages past the TTL.

use chrono::{DateTime, Utc};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncPgConnection;
use serde_json::Value;
use tracing::debug;

use crate::config::IdempotencyConfig;
use crate::domain::{IdempotencyKey, KeyParams, KeyUpdate};

use super::key_store::{find_key, insert_key, update_key, KeyStoreError};

/// Inbound request identity presented at acquire time.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireRequest {
    /// Owning principal.
    pub user_id: i64,
    /// Client-supplied idempotency key.
    pub key: String,
    /// HTTP method of the inbound request.
    pub request_method: String,
    /// URL path of the inbound request.
    pub request_path: String,
    /// Request parameters of the inbound request.
    pub request_params: Value,
}

impl AcquireRequest {
    fn key_params(&self) -> KeyParams {
        KeyParams {
            key: self.key.clone(),
            request_method: self.request_method.clone(),
            request_path: self.request_path.clone(),
            request_params: self.request_params.clone(),
            user_id: self.user_id,
        }
    }
}

/// Successful acquire outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// The key row after the acquire commit.
    pub key: IdempotencyKey,
    /// Whether this request created the row.
    pub freshly_inserted: bool,
    /// Whether the key is finished and the stored response should be
    /// replayed without executing anything. No lease is held in this case.
    pub replay: bool,
}

/// Errors raised by the acquire protocol.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquireError {
    /// The key exists but was created by a different request.
    #[error("idempotency key was used with a different request")]
    RequestMismatch,

    /// Another executor holds a live lease on the key.
    #[error("an earlier request with this idempotency key is still in progress")]
    Locked {
        /// When the live lease was taken.
        locked_at: DateTime<Utc>,
    },

    /// Storage failure underneath the protocol.
    #[error(transparent)]
    Store(#[from] KeyStoreError),
}

impl From<diesel::result::Error> for AcquireError {
    fn from(error: diesel::result::Error) -> Self {
        AcquireError::Store(error.into())
    }
}

/// Run the acquire protocol for an inbound request.
///
/// One serialisable transaction; on success either the lease is held
/// (`replay == false`) or the key is finished (`replay == true`). A
/// [`KeyStoreError::Conflict`] or [`KeyStoreError::Serialization`] escaping
/// here means this request lost a race and the caller should re-run the
/// acquire, which will then observe the winner's committed row.
pub async fn acquire_key(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    config: &IdempotencyConfig,
    request: &AcquireRequest,
) -> Result<Acquisition, AcquireError> {
    let ttl = config.lease_ttl();
    conn.build_transaction()
        .serializable()
        .run(|tx| {
            async move {
                let existing = match find_key(tx, request.user_id, &request.key).await {
                    Ok(existing) => existing,
                    Err(KeyStoreError::NotFound) => {
                        let key = insert_key(tx, now, &request.key_params()).await?;
                        debug!(key_id = key.id, user_id = key.user_id, "idempotency key inserted");
                        return Ok(Acquisition {
                            key,
                            freshly_inserted: true,
                            replay: false,
                        });
                    }
                    Err(err) => return Err(err.into()),
                };

                if !existing.matches_request(
                    &request.request_method,
                    &request.request_path,
                    &request.request_params,
                ) {
                    return Err(AcquireError::RequestMismatch);
                }

                if existing.is_finished() {
                    return Ok(Acquisition {
                        key: existing,
                        freshly_inserted: false,
                        replay: true,
                    });
                }

                if let Some(locked_at) = existing.locked_at {
                    if !existing.lease_expired(now, ttl) {
                        return Err(AcquireError::Locked { locked_at });
                    }
                    debug!(
                        key_id = existing.id,
                        %locked_at,
                        "stealing expired lease"
                    );
                }

                let key = update_key(
                    tx,
                    existing.id,
                    &KeyUpdate {
                        locked_at: Some(Some(now)),
                        last_run_at: Some(now),
                        ..KeyUpdate::default()
                    },
                )
                .await?;

                Ok(Acquisition {
                    key,
                    freshly_inserted: false,
                    replay: false,
                })
            }
            .scope_boxed()
        })
        .await
}

/// Release a held lease without finishing the key.
///
/// Used when a transient failure exhausts its retry budget: the recovery
/// point stays put and the next request with this key resumes immediately
/// instead of waiting out the lease TTL.
pub async fn release_key(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
    key_id: i64,
) -> Result<IdempotencyKey, KeyStoreError> {
    conn.build_transaction()
        .serializable()
        .run(|tx| {
            async move {
                update_key(
                    tx,
                    key_id,
                    &KeyUpdate {
                        locked_at: Some(None),
                        last_run_at: Some(now),
                        ..KeyUpdate::default()
                    },
                )
                .await
            }
            .scope_boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn acquire_request_builds_key_params() {
        let request = AcquireRequest {
            user_id: 123,
            key: "awesomeKey".to_owned(),
            request_method: "POST".to_owned(),
            request_path: "/charges".to_owned(),
            request_params: json!({}),
        };

        let params = request.key_params();
        assert_eq!(params.key, "awesomeKey");
        assert_eq!(params.request_method, "POST");
        assert_eq!(params.request_path, "/charges");
        assert_eq!(params.user_id, 123);
    }

    #[test]
    fn store_errors_pass_through() {
        let err = AcquireError::from(KeyStoreError::NotFound);
        assert!(matches!(err, AcquireError::Store(KeyStoreError::NotFound)));
    }
}
