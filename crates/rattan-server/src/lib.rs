//! Gateway server: the composition root.
//!
//! Everything meets here: the axum HTTP surface with the `/ws` upgrade, the
//! connection pool, request dispatch, the idempotency cache, the inbound
//! channel pump and the periodic housekeeping tasks. The binary in `main.rs`
//! only parses the CLI and wires this crate together.

pub mod connection;
pub mod http;
pub mod idempotency;
pub mod inbound;
pub mod methods;
pub mod state;
pub mod tasks;
pub mod ws;

pub use connection::{ConnectionHandle, ConnectionPool};
pub use idempotency::IdempotencyCache;
pub use state::AppState;
