//! PostgreSQL persistence adapters (Diesel + diesel-async).
//!
//! The key store, lock manager, and phase-side writers all take the
//! caller's connection or open transaction; only the lock manager and the
//! atomic phase primitive open transactions themselves, always at
//! serialisable isolation.

pub mod audit;
pub mod database;
pub mod key_store;
pub mod lock;
mod models;
pub mod outbox;
pub mod rides;
pub mod schema;

pub use database::{Database, DatabaseConfig, DatabaseError};
pub use key_store::{find_key, insert_key, update_key, KeyStoreError};
pub use lock::{acquire_key, release_key, AcquireError, AcquireRequest, Acquisition};
