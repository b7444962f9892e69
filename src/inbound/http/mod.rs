//! Inbound HTTP adapter: handlers, header parsing, and error mapping.

pub mod error;
pub mod health;
pub mod idempotency;
pub mod rides;
pub mod state;

pub use idempotency::{extract_idempotency_key, IDEMPOTENCY_KEY_HEADER};
pub use state::HttpState;
