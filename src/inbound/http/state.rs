//! Shared HTTP adapter state.
//!
//! HTTP handlers accept this state via `actix_web::web::Data`; they only
//! depend on the database handle and the executor, keeping actix types out
//! of the core.

use std::sync::Arc;

use crate::executor::RequestExecutor;
use crate::outbound::persistence::Database;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Database handle; each request owns one connection for its lifetime.
    pub db: Database,
    /// The request state machine.
    pub executor: Arc<RequestExecutor>,
}

impl HttpState {
    /// Construct state from explicit dependencies.
    pub fn new(db: Database, executor: Arc<RequestExecutor>) -> Self {
        Self { db, executor }
    }
}
