//! Ride creation HTTP handler.
//!
//! ```text
//! POST /rides
//! ```
//!
//! The handler is deliberately thin: decode, extract the idempotency key,
//! hand the request to the executor, and emit the stored response it
//! returns. Replayed and freshly computed responses are indistinguishable
//! here by construction.

use actix_web::{http::StatusCode, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::domain::{canonicalize, ApiResult, Error};
use crate::outbound::persistence::AcquireRequest;

use super::idempotency::extract_idempotency_key;
use super::state::HttpState;

/// Request payload for creating a ride.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRideRequestBody {
    /// Rider requesting the trip.
    pub user_id: i64,
    /// Pickup latitude.
    pub origin_lat: f64,
    /// Pickup longitude.
    pub origin_lon: f64,
    /// Drop-off latitude.
    pub target_lat: f64,
    /// Drop-off longitude.
    pub target_lon: f64,
}

/// Create a ride, exactly once per idempotency key.
///
/// Responses:
/// - `201` with the ride on success (replayed byte-for-byte on retries);
/// - `400` for malformed requests or a missing/invalid `Idempotency-Key`;
/// - `402` when the charge was declined (stored and replayed);
/// - `409` when the key was used with different parameters or an earlier
///   request is still in progress;
/// - `422` when ride validation failed (stored and replayed);
/// - `503` when a transient failure exhausted its retry budget.
#[utoipa::path(
    post,
    path = "/rides",
    request_body = CreateRideRequestBody,
    responses(
        (status = 201, description = "Ride created or replayed"),
        (status = 400, description = "Malformed request", body = Error),
        (status = 402, description = "Charge declined", body = Error),
        (status = 409, description = "Idempotency key conflict", body = Error),
        (status = 422, description = "Ride validation failed", body = Error),
        (status = 503, description = "Transient failure; retry", body = Error),
    ),
    params(
        ("Idempotency-Key" = String, Header, description = "Client idempotency key"),
    ),
)]
#[post("/rides")]
pub async fn create_ride(
    state: web::Data<HttpState>,
    request: HttpRequest,
    body: web::Json<CreateRideRequestBody>,
) -> ApiResult<HttpResponse> {
    let key = extract_idempotency_key(request.headers())?
        .ok_or_else(|| Error::invalid_request("idempotency-key header is required"))?;

    let body = body.into_inner();
    let params = serde_json::to_value(&body).map_err(|err| {
        error!(error = %err, "request body re-serialisation failed");
        Error::internal("Internal server error")
    })?;

    let acquire = AcquireRequest {
        user_id: body.user_id,
        key,
        request_method: request.method().as_str().to_owned(),
        request_path: request.path().to_owned(),
        request_params: canonicalize(&params),
    };

    let mut conn = state.db.request_connection().await.map_err(|err| {
        error!(error = %err, "no database connection for the request");
        Error::service_unavailable(
            "the request could not be completed; retry with the same idempotency key",
        )
    })?;

    let response = state.executor.run_request(&mut conn, acquire).await?;

    let status = u16::try_from(response.status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(HttpResponse::build(status).json(response.body))
}
