//! Shared application state.

use chrono::{DateTime, Utc};
use rattan_bridge::BackendBridge;
use rattan_channel::AdapterRegistry;
use rattan_config::Config;
use rattan_session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionPool;
use crate::idempotency::IdempotencyCache;

/// Everything the handlers need, cloned into each task as an `Arc`.
pub struct AppState {
    pub config: Config,
    pub started_at: DateTime<Utc>,
    pub sessions: Arc<SessionManager>,
    pub adapters: Arc<AdapterRegistry>,
    pub bridge: Arc<BackendBridge>,
    pub connections: Arc<ConnectionPool>,
    pub idempotency: Arc<IdempotencyCache>,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<SessionManager>,
        adapters: Arc<AdapterRegistry>,
        bridge: Arc<BackendBridge>,
    ) -> Self {
        let connections = Arc::new(ConnectionPool::new(config.gateway.max_connections));
        let idempotency = Arc::new(IdempotencyCache::new(Duration::from_secs(
            config.gateway.idempotency_ttl_secs,
        )));
        Self {
            config,
            started_at: Utc::now(),
            sessions,
            adapters,
            bridge,
            connections,
            idempotency,
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
