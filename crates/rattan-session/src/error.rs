//! Session and snapshot error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("invalid session request: {0}")]
    Invalid(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
