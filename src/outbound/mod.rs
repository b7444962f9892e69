//! Outbound adapters: PostgreSQL persistence and the payment processor
//! client.

pub mod payment;
pub mod persistence;
