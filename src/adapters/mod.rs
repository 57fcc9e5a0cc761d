//! Adapters - implementations of the ports.
//!
//! - `memory` - process-local catalog and cart store (development, tests)
//! - `postgres` - sqlx-backed catalog and versioned cart store
//! - `events` - NATS, logging and recording event publishers

pub mod events;
pub mod memory;
pub mod postgres;
