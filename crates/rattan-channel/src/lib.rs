//! Channel adapter contract and registry.
//!
//! One [`ChannelAdapter`] per external chat platform (WhatsApp, Telegram,
//! Discord, ...). Concrete adapters live outside this workspace; the
//! contract must stay stable because third-party adapters plug in here.
//! The gateway connects each adapter independently: one platform being down
//! never takes the process with it.

pub mod testing;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rattan_core::InboundMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Adapter errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// What adapters emit into the gateway.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A normalized inbound message
    Message(InboundMessage),
    /// A platform-side error worth surfacing
    Error { channel_id: String, message: String },
}

/// The capability set every platform adapter implements.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique adapter id, used for logging and routing provenance.
    fn id(&self) -> &str;

    /// The cognitive domain messages from this channel default to.
    fn default_domain(&self) -> &str;

    /// Connect to the platform and start emitting [`AdapterEvent`]s on the
    /// given sender.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<(), ChannelError>;

    /// Tear down the platform connection.
    async fn disconnect(&self);

    /// Deliver an outbound message to a target on this channel.
    async fn send(&self, target: &str, content: &str) -> Result<(), ChannelError>;
}

/// Registry of adapters keyed by adapter id.
///
/// The gateway never needs to know concrete adapter types; it talks to the
/// registry by id.
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ChannelAdapter>>,
    events_tx: mpsc::UnboundedSender<AdapterEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<AdapterEvent>>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            adapters: DashMap::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Register an adapter under its own id. A duplicate id replaces the
    /// previous registration.
    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let id = adapter.id().to_string();
        if self.adapters.insert(id.clone(), adapter).is_some() {
            warn!(channel = %id, "replaced previously registered adapter");
        }
    }

    /// Take the shared inbound event stream. Yields `Some` exactly once.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<AdapterEvent>> {
        self.events_rx.lock().take()
    }

    /// Connect every adapter independently. A failing adapter logs a
    /// warning and is skipped; the rest of the system continues with that
    /// channel absent. Returns the number of connected adapters.
    pub async fn connect_all(&self) -> usize {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = self
            .adapters
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut connected = 0;
        for adapter in adapters {
            match adapter.connect(self.events_tx.clone()).await {
                Ok(()) => {
                    info!(channel = adapter.id(), "channel connected");
                    connected += 1;
                }
                Err(e) => {
                    warn!(
                        channel = adapter.id(),
                        "channel connect failed, continuing without it: {}", e
                    );
                }
            }
        }
        connected
    }

    /// Disconnect every adapter.
    pub async fn disconnect_all(&self) {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = self
            .adapters
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for adapter in adapters {
            adapter.disconnect().await;
        }
    }

    /// Send through a registered adapter.
    pub async fn send_to(
        &self,
        channel_id: &str,
        target: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        let adapter = self
            .adapters
            .get(channel_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        adapter.send(target, content).await
    }

    /// Default domain declared by an adapter, if registered.
    pub fn default_domain(&self, channel_id: &str) -> Option<String> {
        self.adapters
            .get(channel_id)
            .map(|e| e.value().default_domain().to_string())
    }

    pub fn adapter_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::EchoAdapter;
    use super::*;

    struct FailingAdapter;

    #[async_trait]
    impl ChannelAdapter for FailingAdapter {
        fn id(&self) -> &str {
            "broken"
        }

        fn default_domain(&self) -> &str {
            "social"
        }

        async fn connect(
            &self,
            _events: mpsc::UnboundedSender<AdapterEvent>,
        ) -> Result<(), ChannelError> {
            Err(ChannelError::Connect("platform unreachable".to_string()))
        }

        async fn disconnect(&self) {}

        async fn send(&self, _target: &str, _content: &str) -> Result<(), ChannelError> {
            Err(ChannelError::Send("not connected".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_adapter_does_not_stop_the_rest() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(FailingAdapter));
        registry.register(Arc::new(EchoAdapter::new("echo-1", "productivity")));

        let connected = registry.connect_all().await;
        assert_eq!(connected, 1);
    }

    #[tokio::test]
    async fn inbound_events_flow_through_the_shared_stream() {
        let registry = AdapterRegistry::new();
        let echo = Arc::new(EchoAdapter::new("echo-1", "social"));
        registry.register(echo.clone());

        let mut rx = registry.take_receiver().unwrap();
        registry.connect_all().await;

        echo.inject("alice", "hello gateway");

        match rx.recv().await.unwrap() {
            AdapterEvent::Message(inbound) => {
                assert_eq!(inbound.channel_id, "echo-1");
                assert_eq!(inbound.sender_id, "alice");
                assert_eq!(inbound.text, "hello gateway");
            }
            other => panic!("expected message event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_to_unknown_channel_errors() {
        let registry = AdapterRegistry::new();
        let result = registry.send_to("nope", "alice", "hi").await;
        assert!(matches!(result, Err(ChannelError::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn outbound_sends_are_recorded_by_echo_adapter() {
        let registry = AdapterRegistry::new();
        let echo = Arc::new(EchoAdapter::new("echo-1", "social"));
        registry.register(echo.clone());
        registry.connect_all().await;

        registry.send_to("echo-1", "alice", "reply").await.unwrap();
        let sent = echo.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("alice".to_string(), "reply".to_string()));
    }

    #[test]
    fn receiver_can_only_be_taken_once() {
        let registry = AdapterRegistry::new();
        assert!(registry.take_receiver().is_some());
        assert!(registry.take_receiver().is_none());
    }
}
