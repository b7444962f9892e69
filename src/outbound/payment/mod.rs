//! Reqwest-backed payment processor adapter.
//!
//! This adapter owns transport details only: request serialisation, the
//! idempotency token header, timeout and HTTP error mapping, and JSON
//! decoding into the gateway outcome. Whether a failure is retried is the
//! executor's decision; this module only classifies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::domain::ports::{
    ChargeOutcome, ChargeReceipt, ChargeRequest, PaymentGateway, PaymentGatewayError,
};

/// Header carrying the deterministic token to the processor.
const PROCESSOR_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Payment gateway adapter that performs HTTP POST requests against the
/// processor's charge endpoint.
pub struct HttpPaymentGateway {
    client: Client,
    charges_endpoint: Url,
}

impl HttpPaymentGateway {
    /// Build an adapter posting to the given charge endpoint with an
    /// explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(charges_endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            charges_endpoint,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChargeResponseDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeclineResponseDto {
    error: Option<DeclineErrorDto>,
}

#[derive(Debug, Deserialize)]
struct DeclineErrorDto {
    #[serde(alias = "decline_code")]
    code: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentGatewayError> {
        let response = self
            .client
            .post(self.charges_endpoint.clone())
            .header(PROCESSOR_IDEMPOTENCY_HEADER, request.token.as_str())
            .json(&serde_json::json!({
                "amount": request.amount_cents,
                "currency": request.currency,
                "user_id": request.user_id,
            }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;

        if status == StatusCode::PAYMENT_REQUIRED {
            return Ok(ChargeOutcome::Declined {
                reason: decline_reason(body.as_ref()),
            });
        }
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }

        decode_capture(body.as_ref())
    }
}

fn decode_capture(body: &[u8]) -> Result<ChargeOutcome, PaymentGatewayError> {
    let decoded: ChargeResponseDto = serde_json::from_slice(body).map_err(|error| {
        PaymentGatewayError::invalid_request(format!("invalid charge response payload: {error}"))
    })?;
    Ok(ChargeOutcome::Captured(ChargeReceipt {
        charge_id: decoded.id,
    }))
}

fn decline_reason(body: &[u8]) -> String {
    serde_json::from_slice::<DeclineResponseDto>(body)
        .ok()
        .and_then(|dto| dto.error)
        .and_then(|err| err.code.or(err.message))
        .unwrap_or_else(|| "card_declined".to_owned())
}

fn map_transport_error(error: reqwest::Error) -> PaymentGatewayError {
    if error.is_timeout() {
        PaymentGatewayError::timeout(error.to_string())
    } else {
        PaymentGatewayError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> PaymentGatewayError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => PaymentGatewayError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            PaymentGatewayError::timeout(message)
        }
        _ if status.is_client_error() => PaymentGatewayError::invalid_request(message),
        _ => PaymentGatewayError::transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for non-network payment mapping helpers.

    use super::*;
    use rstest::rstest;

    #[test]
    fn decodes_captured_charges() {
        let outcome = decode_capture(br#"{"id": "ch_1A2B3C"}"#).expect("capture decodes");
        assert_eq!(
            outcome,
            ChargeOutcome::Captured(ChargeReceipt {
                charge_id: "ch_1A2B3C".to_owned(),
            })
        );
    }

    #[test]
    fn rejects_malformed_capture_payloads() {
        let error = decode_capture(b"not json").expect_err("decode should fail");
        assert!(
            matches!(error, PaymentGatewayError::InvalidRequest { .. }),
            "malformed payloads should map to invalid request"
        );
    }

    #[rstest]
    #[case::decline_code(br#"{"error": {"code": "insufficient_funds"}}"#, "insufficient_funds")]
    #[case::message_fallback(br#"{"error": {"message": "card expired"}}"#, "card expired")]
    #[case::empty_body(b"", "card_declined")]
    fn extracts_decline_reasons(#[case] body: &[u8], #[case] expected: &str) {
        assert_eq!(decline_reason(body), expected);
    }

    #[rstest]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, "RateLimited", true)]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, "Timeout", true)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, "Timeout", true)]
    #[case::bad_request(StatusCode::BAD_REQUEST, "InvalidRequest", false)]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "Transport", true)]
    fn maps_http_statuses_to_expected_errors(
        #[case] status: StatusCode,
        #[case] expected: &str,
        #[case] transient: bool,
    ) {
        let error = map_status_error(status, b"{\"error\":\"processor unavailable\"}");
        let variant = match &error {
            PaymentGatewayError::RateLimited { .. } => "RateLimited",
            PaymentGatewayError::Timeout { .. } => "Timeout",
            PaymentGatewayError::InvalidRequest { .. } => "InvalidRequest",
            PaymentGatewayError::Transport { .. } => "Transport",
        };
        assert_eq!(variant, expected, "status {status} mapped to {error}");
        assert_eq!(error.is_transient(), transient);
    }

    #[test]
    fn long_error_bodies_are_truncated_in_messages() {
        let body = vec![b'x'; 400];
        let error = map_status_error(StatusCode::INTERNAL_SERVER_ERROR, &body);
        let message = error.to_string();
        assert!(message.contains("..."), "long bodies should be previewed");
        assert!(message.len() < 400, "message must not carry the full body");
    }
}
