//! Liveness probe.

use actix_web::{get, HttpResponse, Responder};
use serde_json::json;

/// Report process liveness.
#[get("/healthz")]
pub async fn live() -> impl Responder {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}
