//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the database migrations exactly. They are
//! used by Diesel for compile-time query validation and type-safe SQL
//! generation.

diesel::table! {
    /// Idempotency keys: one row per `(user_id, idempotency_key)`.
    ///
    /// A unique index on that pair serialises duplicate inserts; a partial
    /// index on `locked_at` supports lease-expiry scans.
    idempotency_keys (id) {
        /// Primary key (BIGSERIAL).
        id -> Int8,
        /// Record creation timestamp.
        created_at -> Timestamptz,
        /// Client-supplied opaque token.
        idempotency_key -> Varchar,
        /// Updated on every phase commit.
        last_run_at -> Timestamptz,
        /// Non-null while leased; null when free.
        locked_at -> Nullable<Timestamptz>,
        /// HTTP method frozen at insert.
        request_method -> Varchar,
        /// Canonicalised request parameters frozen at insert.
        request_params -> Jsonb,
        /// URL path frozen at insert.
        request_path -> Varchar,
        /// Stored response status; set exactly when finished.
        response_code -> Nullable<Int4>,
        /// Stored response body; set exactly when finished.
        response_body -> Nullable<Jsonb>,
        /// Progress marker, persisted as a short string.
        recovery_point -> Varchar,
        /// Owning principal.
        user_id -> Int8,
    }
}

diesel::table! {
    /// Rides created by idempotent requests.
    rides (id) {
        /// Primary key (BIGSERIAL).
        id -> Int8,
        /// Record creation timestamp.
        created_at -> Timestamptz,
        /// Creating idempotency key; unique when present.
        idempotency_key_id -> Nullable<Int8>,
        /// Pickup latitude.
        origin_lat -> Float8,
        /// Pickup longitude.
        origin_lon -> Float8,
        /// Drop-off latitude.
        target_lat -> Float8,
        /// Drop-off longitude.
        target_lon -> Float8,
        /// Processor charge id once captured.
        stripe_charge_id -> Nullable<Varchar>,
        /// Rider.
        user_id -> Int8,
    }
}

diesel::table! {
    /// Append-only audit trail written alongside domain mutations.
    audit_records (id) {
        /// Primary key (BIGSERIAL).
        id -> Int8,
        /// Record creation timestamp.
        created_at -> Timestamptz,
        /// Action tag, e.g. `ride.created`.
        action -> Varchar,
        /// Action payload.
        data -> Jsonb,
        /// Identifier of the affected resource.
        resource_id -> Int8,
        /// Type of the affected resource.
        resource_type -> Varchar,
        /// Acting principal.
        user_id -> Int8,
    }
}

diesel::table! {
    /// Outbox of background jobs committed atomically with domain writes.
    staged_jobs (id) {
        /// Primary key (BIGSERIAL).
        id -> Int8,
        /// Job kind understood by the external runner.
        job_name -> Varchar,
        /// Job payload.
        job_args -> Jsonb,
    }
}

diesel::allow_tables_to_appear_in_same_query!(idempotency_keys, rides, audit_records, staged_jobs);
