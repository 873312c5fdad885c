//! In-process adapter for tests and local experiments.

use async_trait::async_trait;
use parking_lot::Mutex;
use rattan_core::InboundMessage;
use tokio::sync::mpsc;

use crate::{AdapterEvent, ChannelAdapter, ChannelError};

/// An adapter with no platform behind it. `connect` always succeeds,
/// outbound sends are recorded, and [`EchoAdapter::inject`] feeds inbound
/// messages into the gateway as if a platform delivered them.
pub struct EchoAdapter {
    id: String,
    default_domain: String,
    events: Mutex<Option<mpsc::UnboundedSender<AdapterEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl EchoAdapter {
    pub fn new(id: impl Into<String>, default_domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_domain: default_domain.into(),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Emit an inbound message as if received from the platform.
    /// No-op when the adapter is not connected.
    pub fn inject(&self, sender_id: &str, text: &str) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(AdapterEvent::Message(InboundMessage::new(
                &self.id, sender_id, text,
            )));
        }
    }

    /// Emit a platform-side error event.
    pub fn inject_error(&self, message: &str) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(AdapterEvent::Error {
                channel_id: self.id.clone(),
                message: message.to_string(),
            });
        }
    }

    /// Outbound messages recorded by `send`, as `(target, content)` pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChannelAdapter for EchoAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn default_domain(&self) -> &str {
        &self.default_domain
    }

    async fn connect(
        &self,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<(), ChannelError> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.events.lock() = None;
    }

    async fn send(&self, target: &str, content: &str) -> Result<(), ChannelError> {
        if self.events.lock().is_none() {
            return Err(ChannelError::Send("adapter not connected".to_string()));
        }
        self.sent
            .lock()
            .push((target.to_string(), content.to_string()));
        Ok(())
    }
}
