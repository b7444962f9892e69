//! Shared fixtures for the Postgres-backed integration tests.
//!
//! Tests run against the database named by `TEST_DATABASE_URL` and are
//! skipped (not failed) when it is unset, so the suite stays green in
//! environments without Postgres. Each test context works in its own
//! schema, created fresh and dropped on cleanup, so suites can run in
//! parallel against one database.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use mockable::Clock;
use serde_json::{json, Value};

use rides_backend::domain::ports::{
    ChargeOutcome, ChargeReceipt, ChargeRequest, PaymentGateway, PaymentGatewayError,
};
use rides_backend::outbound::persistence::AcquireRequest;

static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

const SETUP_STATEMENTS: &[&str] = &[
    "CREATE TABLE idempotency_keys (
        id              BIGSERIAL PRIMARY KEY,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        idempotency_key VARCHAR(100) NOT NULL CHECK (char_length(idempotency_key) > 0),
        last_run_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        locked_at       TIMESTAMPTZ,
        request_method  VARCHAR(10) NOT NULL,
        request_params  JSONB NOT NULL,
        request_path    VARCHAR(100) NOT NULL,
        response_code   INT,
        response_body   JSONB,
        recovery_point  VARCHAR(50) NOT NULL,
        user_id         BIGINT NOT NULL,
        CONSTRAINT response_fields_all_or_nothing CHECK (
            (response_code IS NULL) = (response_body IS NULL)
        )
    )",
    "CREATE UNIQUE INDEX idempotency_keys_user_id_idempotency_key
        ON idempotency_keys (user_id, idempotency_key)",
    "CREATE INDEX idempotency_keys_locked_at
        ON idempotency_keys (locked_at) WHERE locked_at IS NOT NULL",
    "CREATE TABLE rides (
        id                  BIGSERIAL PRIMARY KEY,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        idempotency_key_id  BIGINT REFERENCES idempotency_keys (id),
        origin_lat          DOUBLE PRECISION NOT NULL,
        origin_lon          DOUBLE PRECISION NOT NULL,
        target_lat          DOUBLE PRECISION NOT NULL,
        target_lon          DOUBLE PRECISION NOT NULL,
        stripe_charge_id    VARCHAR(50),
        user_id             BIGINT NOT NULL
    )",
    "CREATE UNIQUE INDEX rides_idempotency_key_id
        ON rides (idempotency_key_id) WHERE idempotency_key_id IS NOT NULL",
    "CREATE TABLE audit_records (
        id              BIGSERIAL PRIMARY KEY,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        action          VARCHAR(50) NOT NULL,
        data            JSONB NOT NULL,
        resource_id     BIGINT NOT NULL,
        resource_type   VARCHAR(50) NOT NULL,
        user_id         BIGINT NOT NULL
    )",
    "CREATE TABLE staged_jobs (
        id        BIGSERIAL PRIMARY KEY,
        job_name  VARCHAR(100) NOT NULL,
        job_args  JSONB NOT NULL
    )",
];

/// A test database context: one schema, one primary connection.
pub struct TestDb {
    url: String,
    schema: String,
    pub conn: AsyncPgConnection,
}

impl TestDb {
    /// Connect and prepare an isolated schema, or `None` when
    /// `TEST_DATABASE_URL` is unset.
    pub async fn connect() -> Option<TestDb> {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set; skipping database-backed test");
                return None;
            }
        };

        let schema = format!(
            "rides_test_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
        );

        let mut conn = AsyncPgConnection::establish(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");

        diesel::sql_query(format!("CREATE SCHEMA {schema}"))
            .execute(&mut conn)
            .await
            .expect("create test schema");
        diesel::sql_query(format!("SET search_path TO {schema}"))
            .execute(&mut conn)
            .await
            .expect("set search path");
        for statement in SETUP_STATEMENTS {
            diesel::sql_query(*statement)
                .execute(&mut conn)
                .await
                .expect("create test tables");
        }

        Some(TestDb { url, schema, conn })
    }

    /// Open a second connection into the same schema, for tests that model
    /// a concurrent request.
    pub async fn extra_connection(&self) -> AsyncPgConnection {
        let mut conn = AsyncPgConnection::establish(&self.url)
            .await
            .expect("open extra connection");
        diesel::sql_query(format!("SET search_path TO {}", self.schema))
            .execute(&mut conn)
            .await
            .expect("set search path on extra connection");
        conn
    }

    /// Drop the schema. Best-effort; leaked schemas only occur on panic.
    pub async fn cleanup(mut self) {
        let _ = diesel::sql_query(format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&mut self.conn)
            .await;
    }
}

/// A controllable clock for lease-expiry tests.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// A gateway that plays back a script of results, then captures everything,
/// counting every call it receives.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ChargeOutcome, PaymentGatewayError>>>,
    calls: AtomicU32,
}

impl ScriptedGateway {
    /// Gateway that captures every charge.
    pub fn capturing() -> Self {
        Self::with_script(Vec::new())
    }

    /// Gateway that plays the given results in order before reverting to
    /// capturing.
    pub fn with_script(script: Vec<Result<ChargeOutcome, PaymentGatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// How many charge calls the processor has seen.
    pub fn calls(&self) -> u32 {
        AtomicU32::load(&self.calls, Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentGatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().expect("script lock").pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ChargeOutcome::Captured(ChargeReceipt {
                charge_id: format!("ch_{}", request.token),
            }))
        })
    }
}

/// Canonical ride-request parameters used across tests.
pub fn ride_params() -> Value {
    json!({
        "originLat": 37.77,
        "originLon": -122.42,
        "targetLat": 37.62,
        "targetLon": -122.38,
        "userId": 123,
    })
}

/// A standard acquire request for `POST /rides`.
pub fn acquire_request(user_id: i64, key: &str) -> AcquireRequest {
    AcquireRequest {
        user_id,
        key: key.to_owned(),
        request_method: "POST".to_owned(),
        request_path: "/rides".to_owned(),
        request_params: ride_params(),
    }
}
