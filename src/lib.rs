//! Rocket Rides backend library.
//!
//! The crate implements an idempotency layer for ride creation: a client
//! request identified by an opaque `Idempotency-Key` produces exactly one
//! externally visible effect (one ride, one charge, one staged receipt)
//! across retries, crashes, and concurrent duplicates.
//!
//! Layering follows the hexagonal convention:
//! - [`domain`]: entities, invariants, and ports; framework-free.
//! - [`executor`]: the durable request state machine (lock acquisition is
//!   in `outbound::persistence::lock`, phase execution here).
//! - [`outbound`]: PostgreSQL adapters (Diesel/diesel-async) and the
//!   payment processor client.
//! - [`inbound`]: actix-web handlers and error mapping.

pub mod config;
pub mod domain;
pub mod executor;
pub mod inbound;
pub mod outbound;
