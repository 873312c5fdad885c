//! WebSocket connection lifecycle.
//!
//! Accept, bind to the main session, announce `ready`, then run the frame
//! loop. Requests are dispatched on their own tasks so a slow handler never
//! blocks the connection; responses may complete out of order, which is why
//! the protocol matches on request ids.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use rattan_core::{decode_frame, encode_frame, ErrorCode, Frame, METHODS};
use rattan_session::MAIN_SESSION_ID;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::idempotency::Claim;
use crate::methods::dispatch;
use crate::state::AppState;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    if state.connections.is_full() {
        warn!("connection rejected: pool at capacity");
        return;
    }

    let connection_id = uuid::Uuid::new_v4().to_string();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let handle = ConnectionHandle::new(&connection_id, MAIN_SESSION_ID, out_tx);
    state.connections.add(handle.clone());
    info!(connection = %connection_id, "client connected");

    // Ready goes out before any client frame is read, with a broadcast
    // sequence number so the client's gap detection covers it.
    let ready = Frame::event(
        "ready",
        json!({
            "connection_id": connection_id,
            "session_id": MAIN_SESSION_ID,
            "version": env!("CARGO_PKG_VERSION"),
            "methods": METHODS,
        }),
        state.connections.next_seq(),
    );
    let _ = handle.send(ready);

    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(frame) = outgoing else { break };
                match encode_frame(&frame) {
                    Ok(raw) => {
                        if sink.send(Message::Text(raw)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(connection = %connection_id, "frame encode failed: {}", e),
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(raw))) => {
                        if !handle_text(&state, &handle, &raw) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection = %connection_id, "socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.connections.remove(&connection_id);
    info!(connection = %connection_id, "client disconnected");
}

/// Process one inbound text frame. A malformed frame gets an
/// `INVALID_FRAME` response and the connection stays open; only a failed
/// token check closes it. Returns whether the connection stays open.
fn handle_text(state: &Arc<AppState>, conn: &ConnectionHandle, raw: &str) -> bool {
    let frame = match decode_frame(raw) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = conn.send(Frame::response_err("", ErrorCode::InvalidFrame, e.to_string()));
            return true;
        }
    };

    match frame {
        Frame::Connect {
            token,
            device_id,
            device_name,
            ..
        } => {
            // The token is opaque: compared byte-for-byte when one is
            // configured, accepted as-is otherwise (loopback trust).
            if let Some(expected) = state.config.gateway.auth_token.as_deref() {
                if token.as_deref() != Some(expected) {
                    warn!(connection = %conn.id, "connect rejected: token mismatch");
                    return false;
                }
            }
            conn.mark_authenticated();
            info!(
                connection = %conn.id,
                device_id = device_id.as_deref().unwrap_or("-"),
                device_name = device_name.as_deref().unwrap_or("-"),
                "client identified"
            );
        }
        Frame::Request {
            id,
            method,
            params,
            idempotency_key,
        } => {
            // With a token configured, requests are gated behind a
            // successful connect.
            if state.config.gateway.auth_token.is_some() && !conn.is_authenticated() {
                let _ = conn.send(Frame::response_err(
                    id,
                    ErrorCode::InvalidFrame,
                    "connect with a valid token before sending requests",
                ));
                return true;
            }

            // One task per request so a slow handler never blocks the
            // frame loop; the response lands whenever it is ready.
            let state = Arc::clone(state);
            let conn = conn.clone();
            tokio::spawn(async move {
                let response =
                    handle_request(&state, &conn, id, &method, params, idempotency_key).await;
                let _ = conn.send(response);
            });
        }
        // Clients do not originate responses or events; tolerated, ignored.
        Frame::Response { id, .. } => {
            debug!(connection = %conn.id, request = %id, "ignoring client response frame")
        }
        Frame::Event { event, .. } => {
            debug!(connection = %conn.id, event, "ignoring client event frame")
        }
    }
    true
}

/// Resolve one request. A request with an idempotency key claims the key
/// before anything runs: the first caller executes, a concurrent retry
/// waits for that outcome, a later retry replays it - the handler itself
/// runs at most once per key within the TTL.
pub async fn handle_request(
    state: &AppState,
    conn: &ConnectionHandle,
    id: String,
    method: &str,
    params: Option<serde_json::Value>,
    idempotency_key: Option<String>,
) -> Frame {
    let Some(key) = idempotency_key else {
        return dispatch(state, conn, id, method, params).await;
    };

    match state.idempotency.begin(&key, &id) {
        Claim::Replay(frame) => return frame,
        Claim::Wait(mut rx) => {
            if rx.changed().await.is_ok() {
                if let Some(outcome) = rx.borrow().clone() {
                    return outcome.frame(&id);
                }
            }
            // The original claim was swept without an outcome; take over.
        }
        Claim::Execute => {}
    }

    let response = dispatch(state, conn, id, method, params).await;
    state.idempotency.complete(&key, &response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use rattan_bridge::{BackendBridge, BridgeConfig};
    use rattan_channel::AdapterRegistry;
    use rattan_config::Config;
    use rattan_session::{FileSnapshotStore, SessionManager, SessionManagerConfig};

    async fn state_with_token(dir: &std::path::Path, token: Option<&str>) -> Arc<AppState> {
        let store = Arc::new(FileSnapshotStore::new(dir));
        let sessions = Arc::new(SessionManager::new(SessionManagerConfig::default(), store));
        sessions.load().await.unwrap();

        let mut config = Config::default();
        config.gateway.auth_token = token.map(str::to_string);
        Arc::new(AppState::new(
            config,
            sessions,
            Arc::new(AdapterRegistry::new()),
            Arc::new(BackendBridge::new(BridgeConfig::default())),
        ))
    }

    fn test_conn() -> (ConnectionHandle, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new("test-conn", MAIN_SESSION_ID, tx), rx)
    }

    #[tokio::test]
    async fn request_before_connect_is_rejected_when_token_configured() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_token(dir.path(), Some("secret")).await;
        let (conn, mut rx) = test_conn();

        let keep_open = handle_text(
            &state,
            &conn,
            r#"{"type":"request","id":"r1","method":"session.list"}"#,
        );
        assert!(keep_open);

        match rx.recv().await.unwrap() {
            Frame::Response { id, ok, error, .. } => {
                assert_eq!(id, "r1");
                assert!(!ok);
                assert_eq!(error.unwrap().code, ErrorCode::InvalidFrame);
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_token_closes_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_token(dir.path(), Some("secret")).await;
        let (conn, _rx) = test_conn();

        let keep_open = handle_text(&state, &conn, r#"{"type":"connect","token":"wrong"}"#);
        assert!(!keep_open);
        assert!(!conn.is_authenticated());
    }

    #[tokio::test]
    async fn valid_token_unlocks_requests() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_token(dir.path(), Some("secret")).await;
        let (conn, mut rx) = test_conn();

        assert!(handle_text(
            &state,
            &conn,
            r#"{"type":"connect","token":"secret"}"#
        ));
        assert!(conn.is_authenticated());

        assert!(handle_text(
            &state,
            &conn,
            r#"{"type":"request","id":"r1","method":"session.list"}"#,
        ));
        match rx.recv().await.unwrap() {
            Frame::Response { id, ok, .. } => {
                assert_eq!(id, "r1");
                assert!(ok);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_token_configured_keeps_loopback_trust() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_token(dir.path(), None).await;
        let (conn, mut rx) = test_conn();

        // Requests work without any connect frame at all.
        assert!(handle_text(
            &state,
            &conn,
            r#"{"type":"request","id":"r1","method":"session.list"}"#,
        ));
        match rx.recv().await.unwrap() {
            Frame::Response { ok, .. } => assert!(ok),
            other => panic!("expected response, got {:?}", other),
        }

        // And any opaque token is accepted.
        assert!(handle_text(&state, &conn, r#"{"type":"connect","token":"anything"}"#));
        assert!(conn.is_authenticated());
    }
}
