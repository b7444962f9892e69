//! Port abstraction for the external payment processor.
//!
//! The charge phase talks to the processor exclusively through
//! [`PaymentGateway`], passing a deterministic idempotency token derived from
//! the key row so that crash-retries of the phase cannot charge twice.
//! Adapters classify their failures into the variants below; the executor
//! only distinguishes transient from permanent.

use async_trait::async_trait;

/// Errors raised by payment gateway adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentGatewayError {
    /// Could not reach the processor (connection refused, reset, DNS).
    #[error("payment gateway transport failed: {message}")]
    Transport { message: String },

    /// The processor did not answer within the call deadline.
    #[error("payment gateway timed out: {message}")]
    Timeout { message: String },

    /// The processor shed load; the call may be retried after backoff.
    #[error("payment gateway rate limited: {message}")]
    RateLimited { message: String },

    /// The processor rejected the request shape; retrying cannot succeed.
    #[error("payment gateway rejected the request: {message}")]
    InvalidRequest { message: String },
}

impl PaymentGatewayError {
    /// Create a transport error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error with the given message.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a rate-limited error with the given message.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Create an invalid-request error with the given message.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether the failure may succeed on a retry of the same call.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest { .. })
    }
}

/// A charge submitted to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Deterministic idempotency token for the processor
    /// (see `domain::idempotency::payment_token`).
    pub token: String,
    /// Charge amount in the smallest currency unit.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Rider being charged.
    pub user_id: i64,
}

/// Receipt returned by the processor for a captured charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    /// Processor-assigned charge id.
    pub charge_id: String,
}

/// Processor decision for a well-formed charge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The charge was captured.
    Captured(ChargeReceipt),
    /// The charge was declined; retrying the same card cannot succeed.
    Declined {
        /// Processor-reported decline reason (e.g. `insufficient_funds`).
        reason: String,
    },
}

/// Port for submitting charges to the payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a charge.
    ///
    /// A declined charge is a successful call with a
    /// [`ChargeOutcome::Declined`] decision; errors are reserved for calls
    /// whose outcome is unknown or whose request was rejected outright.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentGatewayError>;
}

/// Fixture implementation that captures every charge.
///
/// The charge id is derived from the idempotency token so repeated calls
/// for the same key produce the same receipt. Use it in tests and local
/// runs where processor behaviour is not under test.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixturePaymentGateway;

#[async_trait]
impl PaymentGateway for FixturePaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentGatewayError> {
        Ok(ChargeOutcome::Captured(ChargeReceipt {
            charge_id: format!("ch_{}", request.token),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> ChargeRequest {
        ChargeRequest {
            token: "ride-abc123".to_owned(),
            amount_cents: 2000,
            currency: "usd".to_owned(),
            user_id: 123,
        }
    }

    #[rstest]
    #[case(PaymentGatewayError::transport("reset"), true)]
    #[case(PaymentGatewayError::timeout("deadline"), true)]
    #[case(PaymentGatewayError::rate_limited("429"), true)]
    #[case(PaymentGatewayError::invalid_request("bad amount"), false)]
    fn transient_classification(#[case] err: PaymentGatewayError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient, "{err}");
    }

    #[tokio::test]
    async fn fixture_gateway_charge_is_repeatable() {
        let gateway = FixturePaymentGateway;
        let first = gateway.charge(&request()).await.expect("fixture captures");
        let second = gateway.charge(&request()).await.expect("fixture captures");
        assert_eq!(first, second, "same token must yield the same receipt");
        assert!(matches!(
            first,
            ChargeOutcome::Captured(ChargeReceipt { ref charge_id }) if charge_id == "ch_ride-abc123"
        ));
    }
}
