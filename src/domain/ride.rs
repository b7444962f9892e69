//! Ride domain entity and creation parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// A ride created by an idempotent request.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    /// Surrogate row id.
    pub id: i64,
    /// Record creation timestamp.
    pub created_at: DateTime<Utc>,
    /// The idempotency key that created this ride, when created through the
    /// idempotent flow.
    pub idempotency_key_id: Option<i64>,
    /// Pickup latitude.
    pub origin_lat: f64,
    /// Pickup longitude.
    pub origin_lon: f64,
    /// Drop-off latitude.
    pub target_lat: f64,
    /// Drop-off longitude.
    pub target_lon: f64,
    /// Charge id assigned by the payment processor once captured.
    pub stripe_charge_id: Option<String>,
    /// Rider.
    pub user_id: i64,
}

/// Validation errors for [`RideParams`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RideValidationError {
    /// The stored parameters could not be decoded as ride coordinates.
    #[error("ride parameters are not decodable: {message}")]
    Undecodable {
        /// Decoder failure description.
        message: String,
    },
    /// A coordinate is outside its WGS84 range or not a finite number.
    #[error("{field} must be a finite value within {range}")]
    OutOfRange {
        /// Offending field name.
        field: &'static str,
        /// Human-readable permitted range.
        range: &'static str,
    },
}

/// Coordinates requested for a new ride.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideParams {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub target_lat: f64,
    pub target_lon: f64,
}

impl RideParams {
    /// Decode and validate ride parameters from a stored request payload.
    ///
    /// Unknown fields (such as the owning user id frozen alongside the
    /// coordinates) are ignored; the coordinates themselves must be finite
    /// and within WGS84 ranges.
    pub fn from_request_params(params: &Value) -> Result<Self, RideValidationError> {
        let parsed: RideParams = serde_json::from_value(params.clone()).map_err(|err| {
            RideValidationError::Undecodable {
                message: err.to_string(),
            }
        })?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), RideValidationError> {
        check_latitude(self.origin_lat, "originLat")?;
        check_longitude(self.origin_lon, "originLon")?;
        check_latitude(self.target_lat, "targetLat")?;
        check_longitude(self.target_lon, "targetLon")?;
        Ok(())
    }
}

fn check_latitude(value: f64, field: &'static str) -> Result<(), RideValidationError> {
    if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
        return Err(RideValidationError::OutOfRange {
            field,
            range: "[-90, 90]",
        });
    }
    Ok(())
}

fn check_longitude(value: f64, field: &'static str) -> Result<(), RideValidationError> {
    if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
        return Err(RideValidationError::OutOfRange {
            field,
            range: "[-180, 180]",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn decodes_coordinates_and_ignores_sibling_fields() {
        let params = json!({
            "userId": 123,
            "originLat": 37.77,
            "originLon": -122.42,
            "targetLat": 37.62,
            "targetLon": -122.38,
        });

        let parsed = RideParams::from_request_params(&params).expect("valid coordinates");
        assert_eq!(parsed.origin_lat, 37.77);
        assert_eq!(parsed.target_lon, -122.38);
    }

    #[rstest]
    #[case::latitude_too_large(json!({
        "originLat": 90.5, "originLon": 0.0, "targetLat": 0.0, "targetLon": 0.0
    }), "originLat")]
    #[case::longitude_too_small(json!({
        "originLat": 0.0, "originLon": -180.5, "targetLat": 0.0, "targetLon": 0.0
    }), "originLon")]
    #[case::target_out_of_range(json!({
        "originLat": 0.0, "originLon": 0.0, "targetLat": -91.0, "targetLon": 0.0
    }), "targetLat")]
    fn rejects_out_of_range_coordinates(#[case] params: Value, #[case] field: &str) {
        let err = RideParams::from_request_params(&params).expect_err("coordinates must fail");
        assert!(
            matches!(err, RideValidationError::OutOfRange { field: f, .. } if f == field),
            "expected OutOfRange on {field}, got {err:?}"
        );
    }

    #[test]
    fn rejects_missing_coordinates() {
        let err = RideParams::from_request_params(&json!({"originLat": 1.0}))
            .expect_err("partial payload must fail");
        assert!(matches!(err, RideValidationError::Undecodable { .. }));
    }

    #[test]
    fn ride_serialises_in_camel_case() {
        let ride = Ride {
            id: 1,
            created_at: chrono::Utc::now(),
            idempotency_key_id: Some(7),
            origin_lat: 0.0,
            origin_lon: 0.0,
            target_lat: 1.0,
            target_lon: 1.0,
            stripe_charge_id: Some("ch_123".to_owned()),
            user_id: 123,
        };
        let value = serde_json::to_value(&ride).expect("ride serialises");
        assert_eq!(value["stripeChargeId"], json!("ch_123"));
        assert_eq!(value["idempotencyKeyId"], json!(7));
    }
}
