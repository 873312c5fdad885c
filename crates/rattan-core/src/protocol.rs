//! Client wire protocol.
//!
//! Four frame kinds travel over the persistent client connection, each a
//! tagged JSON record: `connect`, `request`, `response`, `event`. Decoding is
//! two-phase so an unknown `type` becomes a typed [`ProtocolError::InvalidFrame`]
//! instead of tearing down the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The fixed, versionless method namespace. Extending it must never break
/// old clients: unknown methods get a `METHOD_NOT_FOUND` response, not a
/// disconnect.
pub const METHODS: &[&str] = &[
    "session.create",
    "session.list",
    "session.get",
    "session.delete",
    "chat.send",
    "chat.history",
    "system.status",
    "system.health",
    "system.config",
    "backend.status",
    "backend.request",
];

/// One discrete unit on the client wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on a new connection. Not a request; the server answers
    /// with an unsolicited `ready` event.
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Caller-initiated request. `id` is opaque and echoed verbatim in the
    /// matching response.
    Request {
        id: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        idempotency_key: Option<String>,
    },
    /// Exactly one per request id.
    Response {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Unsolicited server-to-client notification. `seq` is the per-process
    /// broadcast counter, letting clients detect gaps.
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl Frame {
    /// Build a successful response echoing the request id.
    pub fn response_ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Response {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Build an error response echoing the request id.
    pub fn response_err(
        id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Frame::Response {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorBody::new(code, message)),
        }
    }

    /// Build a broadcast event with an assigned sequence number.
    pub fn event(event: impl Into<String>, payload: Value, seq: u64) -> Self {
        Frame::Event {
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        }
    }
}

/// Error payload carried inside a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Protocol-level error codes. Serialized in SCREAMING_SNAKE_CASE so they
/// match what clients grep their logs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidFrame,
    MethodNotFound,
    InvalidParams,
    SessionNotFound,
    BackendUnavailable,
    BackendError,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidFrame => "INVALID_FRAME",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Frame decode errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON at all
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// JSON, but not a frame we know
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Decode one wire frame.
///
/// An unrecognized or missing `type` yields [`ProtocolError::InvalidFrame`]
/// so the caller can answer with an `INVALID_FRAME` response and keep the
/// connection open.
pub fn decode_frame(raw: &str) -> Result<Frame, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidFrame("missing frame type".to_string()))?;
    match kind {
        "connect" | "request" | "response" | "event" => serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string())),
        other => Err(ProtocolError::InvalidFrame(format!(
            "unknown frame type: {}",
            other
        ))),
    }
}

/// Encode one wire frame as a JSON line.
pub fn encode_frame(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_request_frame() {
        let raw = r#"{"type":"request","id":"r1","method":"session.list"}"#;
        match decode_frame(raw).unwrap() {
            Frame::Request {
                id,
                method,
                params,
                idempotency_key,
            } => {
                assert_eq!(id, "r1");
                assert_eq!(method, "session.list");
                assert!(params.is_none());
                assert!(idempotency_key.is_none());
            }
            other => panic!("expected request frame, got {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_type_is_invalid_not_fatal() {
        let err = decode_frame(r#"{"type":"subscribe","topic":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame(_)));
    }

    #[test]
    fn missing_type_is_invalid() {
        let err = decode_frame(r#"{"id":"r1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFrame(_)));
    }

    #[test]
    fn garbage_is_invalid_json() {
        let err = decode_frame("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn response_echoes_request_id() {
        let frame = Frame::response_ok("abc-123", json!({"x": 1}));
        let encoded = encode_frame(&frame).unwrap();
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["id"], "abc-123");
        assert_eq!(parsed["ok"], true);
        assert_eq!(parsed["payload"]["x"], 1);
    }

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let frame = Frame::response_err("r2", ErrorCode::BackendUnavailable, "down");
        let encoded = encode_frame(&frame).unwrap();
        assert!(encoded.contains("BACKEND_UNAVAILABLE"));
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["error"]["code"], "BACKEND_UNAVAILABLE");
    }

    #[test]
    fn event_frame_roundtrip() {
        let frame = Frame::event("heartbeat", json!({"uptime_secs": 5}), 42);
        let encoded = encode_frame(&frame).unwrap();
        match decode_frame(&encoded).unwrap() {
            Frame::Event { event, seq, .. } => {
                assert_eq!(event, "heartbeat");
                assert_eq!(seq, Some(42));
            }
            other => panic!("expected event frame, got {:?}", other),
        }
    }

    #[test]
    fn connect_frame_optional_fields_omitted() {
        let frame = Frame::Connect {
            token: None,
            device_id: None,
            device_name: None,
            version: None,
        };
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(encoded, r#"{"type":"connect"}"#);
    }
}
