//! Request dispatch.
//!
//! One entry point, [`dispatch`], maps a request frame to exactly one
//! response frame. An unknown method is `METHOD_NOT_FOUND`, never a
//! disconnect, so the method namespace can grow without breaking old
//! clients.

use rattan_bridge::BridgeError;
use rattan_core::{ErrorCode, Frame, Role, METHODS};
use rattan_session::{CreateSessionOptions, MessageDraft, SessionError, SessionKind};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::state::AppState;

/// Handle one request. Always returns a response frame echoing `id`.
pub async fn dispatch(
    state: &AppState,
    conn: &ConnectionHandle,
    id: String,
    method: &str,
    params: Option<Value>,
) -> Frame {
    debug!(connection = %conn.id, method, request = %id, "dispatching request");

    match method {
        "session.create" => session_create(state, id, params).await,
        "session.list" => session_list(state, id).await,
        "session.get" => session_get(state, id, params).await,
        "session.delete" => session_delete(state, id, params).await,
        "chat.send" => chat_send(state, conn, id, params).await,
        "chat.history" => chat_history(state, conn, id, params).await,
        "system.status" => system_status(state, id).await,
        "system.health" => system_health(state, id),
        "system.config" => system_config(state, id),
        "backend.status" => backend_status(state, id),
        "backend.request" => backend_request(state, id, params).await,
        other => Frame::response_err(
            id,
            ErrorCode::MethodNotFound,
            format!("unknown method: {}", other),
        ),
    }
}

fn parse<T: DeserializeOwned>(id: &str, params: Option<Value>) -> Result<T, Frame> {
    serde_json::from_value(params.unwrap_or_else(|| json!({}))).map_err(|e| {
        Frame::response_err(
            id.to_string(),
            ErrorCode::InvalidParams,
            format!("invalid params: {}", e),
        )
    })
}

fn session_error(id: String, err: SessionError) -> Frame {
    match err {
        SessionError::NotFound { id: session_id } => Frame::response_err(
            id,
            ErrorCode::SessionNotFound,
            format!("session not found: {}", session_id),
        ),
        SessionError::Invalid(message) => {
            Frame::response_err(id, ErrorCode::InvalidParams, message)
        }
        other => Frame::response_err(id, ErrorCode::Internal, other.to_string()),
    }
}

fn bridge_error(id: String, err: BridgeError) -> Frame {
    match err {
        BridgeError::Unavailable => {
            Frame::response_err(id, ErrorCode::BackendUnavailable, "backend not ready")
        }
        BridgeError::InvalidRequest(message) => {
            Frame::response_err(id, ErrorCode::InvalidParams, message)
        }
        BridgeError::Backend { status, body } => Frame::Response {
            id,
            ok: false,
            payload: None,
            error: Some(
                rattan_core::ErrorBody::new(
                    ErrorCode::BackendError,
                    format!("backend returned {}", status),
                )
                .with_details(json!({ "status": status, "body": body })),
            ),
        },
        other => Frame::response_err(id, ErrorCode::BackendError, other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    kind: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

async fn session_create(state: &AppState, id: String, params: Option<Value>) -> Frame {
    let params: CreateParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };

    let kind = match params.kind.as_str() {
        "main" => SessionKind::Main,
        "group" => SessionKind::Group,
        "domain" => SessionKind::Domain,
        other => {
            return Frame::response_err(
                id,
                ErrorCode::InvalidParams,
                format!("unknown session kind: {}", other),
            )
        }
    };

    let opts = CreateSessionOptions {
        channel_id: params.channel_id,
        domain: params.domain,
        agent_id: params.agent_id,
        metadata: None,
    };

    match state.sessions.create_session(kind, opts).await {
        Ok(session) => Frame::response_ok(id, json!({ "session": session.summary() })),
        Err(e) => session_error(id, e),
    }
}

async fn session_list(state: &AppState, id: String) -> Frame {
    let sessions = state.sessions.list().await;
    Frame::response_ok(id, json!({ "count": sessions.len(), "sessions": sessions }))
}

#[derive(Debug, Deserialize)]
struct SessionIdParams {
    #[serde(alias = "sessionId")]
    session_id: String,
}

async fn session_get(state: &AppState, id: String, params: Option<Value>) -> Frame {
    let params: SessionIdParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };

    match state.sessions.get_session(&params.session_id).await {
        Some(session) => Frame::response_ok(id, json!({ "session": session })),
        None => Frame::response_err(
            id,
            ErrorCode::SessionNotFound,
            format!("session not found: {}", params.session_id),
        ),
    }
}

async fn session_delete(state: &AppState, id: String, params: Option<Value>) -> Frame {
    let params: SessionIdParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };

    // The main session answers deleted=false instead of an error.
    match state.sessions.delete_session(&params.session_id).await {
        Ok(deleted) => Frame::response_ok(id, json!({ "deleted": deleted })),
        Err(e) => session_error(id, e),
    }
}

#[derive(Debug, Deserialize)]
struct ChatSendParams {
    /// `message` is what chat clients put on the wire; `content` matches
    /// the history entry field.
    #[serde(alias = "message")]
    content: String,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
}

async fn chat_send(
    state: &AppState,
    conn: &ConnectionHandle,
    id: String,
    params: Option<Value>,
) -> Frame {
    let params: ChatSendParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let session_id = params
        .session_id
        .unwrap_or_else(|| conn.session_id.clone());

    let user_message = match state
        .sessions
        .add_message(&session_id, MessageDraft::new(Role::User, params.content))
        .await
    {
        Ok(message) => message,
        Err(e) => return session_error(id, e),
    };
    state.connections.broadcast(
        "chat.message",
        json!({ "session_id": session_id, "message": user_message }),
    );

    // Backend down is a degraded answer, not an error: the user message is
    // already durable.
    if !state.bridge.is_ready() {
        return Frame::response_ok(
            id,
            json!({ "user_message": user_message, "note": "backend not connected" }),
        );
    }

    let history = match state.sessions.history(&session_id, None).await {
        Ok(history) => history,
        Err(e) => return session_error(id, e),
    };

    let completion = match state.bridge.chat_completion(&history).await {
        Ok(content) => content,
        Err(e) => return bridge_error(id, e),
    };

    let assistant_message = match state
        .sessions
        .add_message(&session_id, MessageDraft::new(Role::Assistant, completion))
        .await
    {
        Ok(message) => message,
        Err(e) => return session_error(id, e),
    };
    state.connections.broadcast(
        "chat.message",
        json!({ "session_id": session_id, "message": assistant_message }),
    );

    Frame::response_ok(
        id,
        json!({ "user_message": user_message, "assistant_message": assistant_message }),
    )
}

#[derive(Debug, Deserialize)]
struct ChatHistoryParams {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn chat_history(
    state: &AppState,
    conn: &ConnectionHandle,
    id: String,
    params: Option<Value>,
) -> Frame {
    let params: ChatHistoryParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };
    let session_id = params
        .session_id
        .unwrap_or_else(|| conn.session_id.clone());

    match state.sessions.history(&session_id, params.limit).await {
        Ok(messages) => Frame::response_ok(
            id,
            json!({ "session_id": session_id, "count": messages.len(), "messages": messages }),
        ),
        Err(e) => session_error(id, e),
    }
}

async fn system_status(state: &AppState, id: String) -> Frame {
    Frame::response_ok(
        id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.uptime_secs(),
            "connections": state.connections.count(),
            "sessions": state.sessions.session_count(),
            "channels": state.adapters.adapter_ids(),
            "backend": state.bridge.status(),
        }),
    )
}

fn system_health(state: &AppState, id: String) -> Frame {
    Frame::response_ok(
        id,
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "backend_ready": state.bridge.is_ready(),
        }),
    )
}

fn system_config(state: &AppState, id: String) -> Frame {
    // Secrets never leave the process.
    let mut config = state.config.clone();
    if config.gateway.auth_token.is_some() {
        config.gateway.auth_token = Some("<redacted>".to_string());
    }
    match serde_json::to_value(&config) {
        Ok(value) => Frame::response_ok(id, json!({ "config": value, "methods": METHODS })),
        Err(e) => {
            warn!("failed to serialize config: {}", e);
            Frame::response_err(id, ErrorCode::Internal, "config serialization failed")
        }
    }
}

fn backend_status(state: &AppState, id: String) -> Frame {
    Frame::response_ok(id, json!({ "backend": state.bridge.status() }))
}

#[derive(Debug, Deserialize)]
struct BackendRequestParams {
    method: String,
    path: String,
    #[serde(default)]
    body: Option<Value>,
}

async fn backend_request(state: &AppState, id: String, params: Option<Value>) -> Frame {
    let params: BackendRequestParams = match parse(&id, params) {
        Ok(p) => p,
        Err(frame) => return frame,
    };

    match state
        .bridge
        .request(&params.method, &params.path, params.body)
        .await
    {
        Ok(payload) => Frame::response_ok(id, payload),
        Err(e) => bridge_error(id, e),
    }
}
