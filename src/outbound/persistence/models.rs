//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Repository functions convert between
//! these rows and domain types, keeping Diesel confined to this layer.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{audit_records, idempotency_keys, rides, staged_jobs};

/// Row struct for reading from the idempotency_keys table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = idempotency_keys)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct IdempotencyKeyRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub last_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub request_method: String,
    pub request_params: Value,
    pub request_path: String,
    pub response_code: Option<i32>,
    pub response_body: Option<Value>,
    pub recovery_point: String,
    pub user_id: i64,
}

/// Insertable struct for creating new idempotency keys.
///
/// Timestamps are provided by the caller's clock rather than column
/// defaults so the insert and the lease it takes agree on `now`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = idempotency_keys)]
pub(crate) struct NewIdempotencyKeyRow<'a> {
    pub created_at: DateTime<Utc>,
    pub idempotency_key: &'a str,
    pub last_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub request_method: &'a str,
    pub request_params: &'a Value,
    pub request_path: &'a str,
    pub recovery_point: &'a str,
    pub user_id: i64,
}

/// Changeset for the mutable columns of an idempotency key.
///
/// Outer `None` leaves a column untouched; for nullable columns the inner
/// option distinguishes "set to null" from "set to a value".
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = idempotency_keys)]
pub(crate) struct KeyRowChanges {
    pub recovery_point: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub response_code: Option<Option<i32>>,
    pub response_body: Option<Option<Value>>,
}

impl KeyRowChanges {
    /// Whether the changeset would touch no columns (Diesel rejects an
    /// empty `SET` clause, so callers skip the statement instead).
    pub fn is_noop(&self) -> bool {
        self.recovery_point.is_none()
            && self.last_run_at.is_none()
            && self.locked_at.is_none()
            && self.response_code.is_none()
            && self.response_body.is_none()
    }
}

/// Row struct for reading from the rides table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = rides)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct RideRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub idempotency_key_id: Option<i64>,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub target_lat: f64,
    pub target_lon: f64,
    pub stripe_charge_id: Option<String>,
    pub user_id: i64,
}

/// Insertable struct for creating ride records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = rides)]
pub(crate) struct NewRideRow {
    pub idempotency_key_id: Option<i64>,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub target_lat: f64,
    pub target_lon: f64,
    pub user_id: i64,
}

/// Insertable struct for audit records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_records)]
pub(crate) struct NewAuditRecordRow<'a> {
    pub action: &'a str,
    pub data: &'a Value,
    pub resource_id: i64,
    pub resource_type: &'a str,
    pub user_id: i64,
}

/// Insertable struct for outbox jobs.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = staged_jobs)]
pub(crate) struct NewStagedJobRow<'a> {
    pub job_name: &'a str,
    pub job_args: &'a Value,
}
