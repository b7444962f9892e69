//! Database handle for the idempotency store.
//!
//! Every inbound request checks out exactly one connection and runs its
//! whole key lifecycle on it: the acquire transaction, each serialisable
//! phase transaction, and any lease release. The handle is therefore sized
//! by how many rides may be in flight at once, not by statement volume, and
//! a checkout that cannot be served quickly is refused rather than queued
//! behind the lease TTL.

use std::time::Duration;

use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

/// Errors raised by the database handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// No connection could be served within the checkout deadline.
    #[error("no database connection available for the request: {message}")]
    Unavailable { message: String },

    /// The handle itself could not be built.
    #[error("database handle setup failed: {message}")]
    Setup { message: String },
}

impl DatabaseError {
    /// Create an unavailable error with the given message.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a setup error with the given message.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }
}

/// Connection settings for the idempotency store.
///
/// `request_concurrency` caps how many rides can execute phases at the same
/// time; each one owns its connection for the full request. The checkout
/// deadline stays well under the lease TTL so a saturated handle surfaces
/// as a retryable failure instead of holding the caller until someone
/// else's lease expires.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: String,
    request_concurrency: u32,
    checkout_deadline: Duration,
}

impl DatabaseConfig {
    /// Create a configuration for the given database URL.
    ///
    /// Defaults: 16 concurrent requests, 5 second checkout deadline.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_concurrency: 16,
            checkout_deadline: Duration::from_secs(5),
        }
    }

    /// Set how many requests may hold a connection simultaneously.
    pub fn with_request_concurrency(mut self, requests: u32) -> Self {
        self.request_concurrency = requests.max(1);
        self
    }

    /// Set how long a request may wait for a connection before it is
    /// refused.
    pub fn with_checkout_deadline(mut self, deadline: Duration) -> Self {
        self.checkout_deadline = deadline;
        self
    }

    /// The configured database URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Handle over the PostgreSQL connections backing the idempotency store.
#[derive(Clone)]
pub struct Database {
    connections: Pool<AsyncPgConnection>,
}

impl Database {
    /// Build the handle and its underlying connections.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Setup`] when the connection manager cannot
    /// be constructed for the configured URL.
    pub async fn connect(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.url());

        let connections = Pool::builder()
            .max_size(config.request_concurrency)
            .connection_timeout(config.checkout_deadline)
            .build(manager)
            .await
            .map_err(|err| DatabaseError::setup(err.to_string()))?;

        Ok(Self { connections })
    }

    /// Check out the connection that will carry one request's key
    /// lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Unavailable`] when every connection is
    /// occupied past the checkout deadline; the caller surfaces this as a
    /// retryable failure.
    pub async fn request_connection(
        &self,
    ) -> Result<PooledConnection<'_, AsyncPgConnection>, DatabaseError> {
        self.connections
            .get()
            .await
            .map_err(|err| DatabaseError::unavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn config_defaults_fit_a_single_node_deployment() {
        let config = DatabaseConfig::new("postgres://localhost/rocket_rides");

        assert_eq!(config.url(), "postgres://localhost/rocket_rides");
        assert_eq!(config.request_concurrency, 16);
        assert_eq!(config.checkout_deadline, Duration::from_secs(5));
    }

    #[rstest]
    fn config_clamps_concurrency_to_at_least_one_request() {
        let config = DatabaseConfig::new("postgres://localhost/rocket_rides")
            .with_request_concurrency(0)
            .with_checkout_deadline(Duration::from_millis(500));

        assert_eq!(config.request_concurrency, 1);
        assert_eq!(config.checkout_deadline, Duration::from_millis(500));
    }

    #[rstest]
    fn errors_name_the_failing_stage() {
        let unavailable = DatabaseError::unavailable("16 connections busy");
        let setup = DatabaseError::setup("bad url");

        assert_eq!(
            unavailable.to_string(),
            "no database connection available for the request: 16 connections busy"
        );
        assert_eq!(setup.to_string(), "database handle setup failed: bad url");
    }
}
