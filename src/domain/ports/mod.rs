//! Domain ports for external collaborators.
//!
//! The executor core depends only on these narrow contracts; adapters under
//! `outbound` provide the production implementations.

mod payment_gateway;
mod telemetry;

#[cfg(test)]
pub use payment_gateway::MockPaymentGateway;
pub use payment_gateway::{
    ChargeOutcome, ChargeReceipt, ChargeRequest, FixturePaymentGateway, PaymentGateway,
    PaymentGatewayError,
};
pub use telemetry::{
    NoOpRequestTelemetry, RequestResolution, RequestTelemetry, RiderScope, TelemetryError,
};
