//! Inbound channel pump.
//!
//! Drains the shared adapter event stream: route each message to its
//! domain session, append it, ask the backend for a reply when available,
//! answer over the originating adapter and broadcast events to connected
//! clients. One failing message never stops the pump.

use rattan_channel::AdapterEvent;
use rattan_core::{InboundMessage, Role};
use rattan_session::MessageDraft;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Fallback domain when a channel declares none.
const FALLBACK_DOMAIN: &str = "social";

pub fn spawn_inbound_pump(
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<AdapterEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("inbound channel pump started");
        while let Some(event) = events.recv().await {
            match event {
                AdapterEvent::Message(inbound) => {
                    handle_inbound(&state, inbound).await;
                }
                AdapterEvent::Error {
                    channel_id,
                    message,
                } => {
                    warn!(channel = %channel_id, "channel error: {}", message);
                    state.connections.broadcast(
                        "channel.error",
                        json!({ "channel_id": channel_id, "message": message }),
                    );
                }
            }
        }
        info!("inbound channel pump stopped");
    })
}

async fn handle_inbound(state: &AppState, inbound: InboundMessage) {
    let default_domain = state
        .adapters
        .default_domain(&inbound.channel_id)
        .unwrap_or_else(|| FALLBACK_DOMAIN.to_string());

    let decision = rattan_router::route(&inbound, &default_domain);
    debug!(
        channel = %inbound.channel_id,
        sender = %inbound.sender_id,
        domain = %decision.domain,
        confidence = decision.confidence,
        "routed inbound message"
    );

    let session = match state
        .sessions
        .get_or_create_domain_session(&decision.domain)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(domain = %decision.domain, "failed to resolve domain session: {}", e);
            return;
        }
    };

    let draft = MessageDraft::new(Role::User, &inbound.text)
        .with_source(&inbound.channel_id, &inbound.sender_id);
    let user_message = match state.sessions.add_message(&session.id, draft).await {
        Ok(message) => message,
        Err(e) => {
            warn!(session_id = %session.id, "failed to record inbound message: {}", e);
            return;
        }
    };

    state.connections.broadcast(
        "message.inbound",
        json!({
            "session_id": session.id,
            "channel_id": inbound.channel_id,
            "sender_id": inbound.sender_id,
            "domain": decision.domain,
            "confidence": decision.confidence,
            "message": user_message,
        }),
    );

    // Without the backend the message is still recorded; the reply just
    // never happens.
    if !state.bridge.is_ready() {
        debug!(session_id = %session.id, "backend not ready, no reply sent");
        return;
    }

    let history = match state.sessions.history(&session.id, None).await {
        Ok(history) => history,
        Err(e) => {
            warn!(session_id = %session.id, "failed to read history: {}", e);
            return;
        }
    };

    let completion = match state.bridge.chat_completion(&history).await {
        Ok(content) => content,
        Err(e) => {
            warn!(session_id = %session.id, "completion failed: {}", e);
            return;
        }
    };

    let assistant_message = match state
        .sessions
        .add_message(&session.id, MessageDraft::new(Role::Assistant, &completion))
        .await
    {
        Ok(message) => message,
        Err(e) => {
            warn!(session_id = %session.id, "failed to record reply: {}", e);
            return;
        }
    };

    if let Err(e) = state
        .adapters
        .send_to(&inbound.channel_id, &inbound.sender_id, &completion)
        .await
    {
        warn!(channel = %inbound.channel_id, "failed to deliver reply: {}", e);
    }

    state.connections.broadcast(
        "chat.message",
        json!({ "session_id": session.id, "message": assistant_message }),
    );
}
