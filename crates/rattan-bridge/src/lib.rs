//! Backend bridge: supervisor and proxy for the external inference process.
//!
//! The inference backend is a black box reachable over HTTP plus a duplex
//! socket. This crate owns its whole lifecycle: executable discovery, spawn,
//! health polling, the heartbeat socket, request proxying and graceful
//! shutdown. The gateway only ever asks [`BackendBridge::is_ready`] or
//! issues a proxy call.

pub mod bridge;
pub mod error;

pub use bridge::{BackendBridge, BridgeConfig, BridgeState, BridgeStatus};
pub use error::BridgeError;
