//! Periodic housekeeping: broadcast heartbeat, idempotency sweep, group
//! session pruning. All tasks are aborted on shutdown.

use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::state::AppState;

/// Interval of the idempotency-cache sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn_periodic_tasks(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    vec![
        spawn_heartbeat(Arc::clone(&state)),
        spawn_idempotency_sweep(Arc::clone(&state)),
        spawn_session_prune(state),
    ]
}

/// Broadcast a liveness heartbeat to every connected client.
fn spawn_heartbeat(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.gateway.heartbeat_interval_secs);
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.tick().await; // immediate first tick
        loop {
            tick.tick().await;
            state.connections.broadcast(
                "heartbeat",
                json!({
                    "uptime_secs": state.uptime_secs(),
                    "connections": state.connections.count(),
                    "sessions": state.sessions.session_count(),
                }),
            );
        }
    })
}

fn spawn_idempotency_sweep(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let removed = state.idempotency.sweep();
            if removed > 0 {
                debug!(removed, "swept expired idempotency entries");
            }
        }
    })
}

fn spawn_session_prune(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.sessions.prune_interval_secs);
    let max_age = ChronoDuration::hours(state.config.sessions.prune_max_age_hours as i64);
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.tick().await;
        loop {
            tick.tick().await;
            state.sessions.prune_inactive(max_age).await;
        }
    })
}
