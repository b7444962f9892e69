//! Audit trail writes performed inside phase transactions.

use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::Value;

use super::key_store::KeyStoreError;
use super::models::NewAuditRecordRow;
use super::schema::audit_records;

/// An audit entry recorded alongside a domain mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry<'a> {
    /// Action tag, e.g. `ride.created`.
    pub action: &'a str,
    /// Action payload.
    pub data: &'a Value,
    /// Identifier of the affected resource.
    pub resource_id: i64,
    /// Type of the affected resource.
    pub resource_type: &'a str,
    /// Acting principal.
    pub user_id: i64,
}

/// Append an audit record in the caller's transaction.
pub async fn record_audit(
    conn: &mut AsyncPgConnection,
    entry: &AuditEntry<'_>,
) -> Result<(), KeyStoreError> {
    let new_row = NewAuditRecordRow {
        action: entry.action,
        data: entry.data,
        resource_id: entry.resource_id,
        resource_type: entry.resource_type,
        user_id: entry.user_id,
    };

    diesel::insert_into(audit_records::table)
        .values(&new_row)
        .execute(conn)
        .await?;

    Ok(())
}
