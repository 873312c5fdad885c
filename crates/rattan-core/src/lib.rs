//! Rattan core types - messages, routing decisions and the client wire protocol.
//!
//! Everything in this crate is plain data shared between the gateway server,
//! the session store, the domain router and the channel adapters. No I/O
//! happens here.

pub mod protocol;
pub mod types;

pub use protocol::{
    decode_frame, encode_frame, ErrorBody, ErrorCode, Frame, ProtocolError, METHODS,
};
pub use types::{InboundMessage, Message, Role, RouteDecision, RouteIntent};
