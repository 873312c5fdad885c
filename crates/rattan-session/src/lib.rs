//! Session directory for the Rattan gateway.
//!
//! Owns the in-memory session map and the snapshot persistence boundary.
//! Other components only ever receive cloned [`Session`] values; all
//! mutation goes through [`SessionManager`]'s serialized entry points.

pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use manager::{SessionManager, SessionManagerConfig};
pub use store::{FileSnapshotStore, SnapshotStore};
pub use types::{
    CreateSessionOptions, MessageDraft, Session, SessionKind, SessionSummary, MAIN_SESSION_ID,
};
