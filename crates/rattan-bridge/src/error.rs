//! Bridge error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Raised whenever a proxy call is attempted while the bridge is not
    /// fully ready; the call is never attempted.
    #[error("backend not ready")]
    Unavailable,

    #[error("no backend interpreter found; tried: {0}")]
    InterpreterNotFound(String),

    #[error("no backend entry script found; tried: {0}")]
    EntryNotFound(String),

    #[error("failed to spawn backend: {0}")]
    Spawn(String),

    #[error("backend health check did not pass after {attempts} attempts")]
    HealthTimeout { attempts: u32 },

    #[error("duplex socket error: {0}")]
    Duplex(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("invalid proxy request: {0}")]
    InvalidRequest(String),

    #[error("malformed backend response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
