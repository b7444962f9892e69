//! Domain error representation shared across adapters.
//!
//! Keep this module free from HTTP or framework concerns so the same error
//! shape can be mapped by any adapter (HTTP handlers, background workers).
//! The serialised form doubles as the stored response body for requests that
//! terminate with an error, so it must stay stable across releases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// Stable machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request is malformed or fails validation.
    InvalidRequest,
    /// The payment processor declined the charge.
    PaymentRequired,
    /// The requested resource does not exist.
    NotFound,
    /// The idempotency key conflicts with prior use (mismatched parameters
    /// or a request still in progress).
    Conflict,
    /// The request was well formed but failed domain validation.
    UnprocessableEntity,
    /// A transient failure exhausted its retry budget; the caller may retry.
    ServiceUnavailable,
    /// An unexpected error occurred on the server.
    InternalError,
}

/// Domain error payload consumed by adapters.
///
/// ## Invariants
/// - `message` must be non-empty once trimmed of whitespace.
///
/// # Examples
/// ```
/// use rides_backend::domain::{Error, ErrorCode};
///
/// let err = Error::conflict("key in use");
/// assert_eq!(err.code(), ErrorCode::Conflict);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, ThisError)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct Error {
    #[schema(example = "conflict")]
    code: ErrorCode,
    #[schema(example = "An existing request is in progress")]
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl Error {
    /// Create a new error.
    ///
    /// # Panics
    ///
    /// Panics if `message` is empty once trimmed; all call sites pass
    /// literal, non-empty messages.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        assert!(
            !message.trim().is_empty(),
            "error messages must not be empty"
        );
        Self {
            code,
            message,
            details: None,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message returned to clients.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Supplementary error details for clients.
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Attach structured details to the error.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convenience constructor for [`ErrorCode::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Convenience constructor for [`ErrorCode::PaymentRequired`].
    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PaymentRequired, message)
    }

    /// Convenience constructor for [`ErrorCode::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Convenience constructor for [`ErrorCode::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Convenience constructor for [`ErrorCode::UnprocessableEntity`].
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnprocessableEntity, message)
    }

    /// Convenience constructor for [`ErrorCode::ServiceUnavailable`].
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Convenience constructor for [`ErrorCode::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Redact server-side details so the payload is safe to expose to clients.
    ///
    /// Internal errors keep their code but replace the message with a generic
    /// explanation and drop structured details.
    pub fn redacted_for_clients(&self) -> Self {
        if !matches!(self.code, ErrorCode::InternalError) {
            return self.clone();
        }
        let mut redacted = self.clone();
        redacted.message = "Internal server error".to_string();
        redacted.details = None;
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Error::invalid_request("bad"), ErrorCode::InvalidRequest)]
    #[case(Error::payment_required("declined"), ErrorCode::PaymentRequired)]
    #[case(Error::not_found("missing"), ErrorCode::NotFound)]
    #[case(Error::conflict("in use"), ErrorCode::Conflict)]
    #[case(Error::unprocessable("invalid ride"), ErrorCode::UnprocessableEntity)]
    #[case(Error::service_unavailable("retry"), ErrorCode::ServiceUnavailable)]
    #[case(Error::internal("boom"), ErrorCode::InternalError)]
    fn constructors_set_expected_codes(#[case] err: Error, #[case] expected: ErrorCode) {
        assert_eq!(err.code(), expected);
    }

    #[test]
    fn serialises_with_camel_case_code() {
        let err = Error::unprocessable("origin latitude out of range");
        let value = serde_json::to_value(&err).expect("error serialises");
        assert_eq!(value["code"], json!("unprocessable_entity"));
        assert_eq!(value["message"], json!("origin latitude out of range"));
        assert!(
            value.get("details").is_none(),
            "absent details must be omitted"
        );
    }

    #[test]
    fn serde_roundtrip_preserves_fields() {
        let err = Error::conflict("key in use").with_details(json!({"key": "awesomeKey"}));
        let json = serde_json::to_string(&err).expect("serialise");
        let parsed: Error = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(parsed, err);
    }

    #[test]
    fn redaction_masks_internal_errors_only() {
        let internal = Error::internal("pool exhausted").with_details(json!({"pool": "db"}));
        let redacted = internal.redacted_for_clients();
        assert_eq!(redacted.message(), "Internal server error");
        assert!(redacted.details().is_none());

        let conflict = Error::conflict("key in use");
        assert_eq!(conflict.redacted_for_clients(), conflict);
    }
}
