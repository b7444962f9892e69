//! Outbox sink: background jobs committed with the caller's transaction.
//!
//! Jobs land in the `staged_jobs` table and are delivered by an external
//! runner; committing them atomically with domain writes is what makes the
//! notification exactly-once from this service's point of view.

use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::Value;

use super::key_store::KeyStoreError;
use super::models::NewStagedJobRow;
use super::schema::staged_jobs;

/// Insert a background job row in the caller's transaction.
pub async fn enqueue_job(
    conn: &mut AsyncPgConnection,
    job_name: &str,
    job_args: &Value,
) -> Result<(), KeyStoreError> {
    let new_row = NewStagedJobRow { job_name, job_args };

    diesel::insert_into(staged_jobs::table)
        .values(&new_row)
        .execute(conn)
        .await?;

    Ok(())
}
