//! Ride row operations performed inside phase transactions.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::domain::{Ride, RideParams};

use super::key_store::KeyStoreError;
use super::models::{NewRideRow, RideRow};
use super::schema::rides;

fn row_to_ride(row: RideRow) -> Ride {
    Ride {
        id: row.id,
        created_at: row.created_at,
        idempotency_key_id: row.idempotency_key_id,
        origin_lat: row.origin_lat,
        origin_lon: row.origin_lon,
        target_lat: row.target_lat,
        target_lon: row.target_lon,
        stripe_charge_id: row.stripe_charge_id,
        user_id: row.user_id,
    }
}

/// Insert the ride for an idempotency key, or return the existing one.
///
/// The unique index on `idempotency_key_id` makes the insert a no-op when a
/// ride already exists for this key, so re-running the phase after a lease
/// steal cannot create a second ride.
pub async fn create_ride(
    conn: &mut AsyncPgConnection,
    key_id: i64,
    user_id: i64,
    params: &RideParams,
) -> Result<Ride, KeyStoreError> {
    let new_row = NewRideRow {
        idempotency_key_id: Some(key_id),
        origin_lat: params.origin_lat,
        origin_lon: params.origin_lon,
        target_lat: params.target_lat,
        target_lon: params.target_lon,
        user_id,
    };

    diesel::insert_into(rides::table)
        .values(&new_row)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    find_ride_for_key(conn, key_id)
        .await?
        .ok_or_else(|| KeyStoreError::query("ride row missing after insert"))
}

/// Look up the ride created by an idempotency key.
pub async fn find_ride_for_key(
    conn: &mut AsyncPgConnection,
    key_id: i64,
) -> Result<Option<Ride>, KeyStoreError> {
    let row: Option<RideRow> = rides::table
        .filter(rides::idempotency_key_id.eq(Some(key_id)))
        .select(RideRow::as_select())
        .first(conn)
        .await
        .optional()?;

    Ok(row.map(row_to_ride))
}

/// Stamp the processor charge id onto the key's ride.
pub async fn attach_charge(
    conn: &mut AsyncPgConnection,
    key_id: i64,
    charge_id: &str,
) -> Result<(), KeyStoreError> {
    let updated = diesel::update(rides::table.filter(rides::idempotency_key_id.eq(Some(key_id))))
        .set(rides::stripe_charge_id.eq(Some(charge_id)))
        .execute(conn)
        .await?;

    if updated == 0 {
        return Err(KeyStoreError::query(format!(
            "no ride to attach charge to for key {key_id}"
        )));
    }
    Ok(())
}
