//! Client connection pool.
//!
//! Each WebSocket connection gets a [`ConnectionHandle`] with an unbounded
//! outbound queue; the pool owns the process-wide broadcast sequence counter
//! so clients can detect event gaps.

use dashmap::DashMap;
use rattan_core::Frame;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("connection not found: {0}")]
    NotFound(String),
}

/// Handle for pushing frames to one connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: String,
    /// The session this connection is bound to. Every connection starts on
    /// the main session.
    pub session_id: String,
    sender: mpsc::UnboundedSender<Frame>,
    authenticated: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            sender,
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.sender.send(frame).map_err(|_| ConnectionError::Closed)
    }

    /// The `connect` frame was seen on this connection.
    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

/// All live client connections plus the broadcast sequence counter.
pub struct ConnectionPool {
    connections: DashMap<String, ConnectionHandle>,
    max_connections: usize,
    /// Monotone per process; stamped onto every broadcast event
    seq: AtomicU64,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_connections,
            seq: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.max_connections
    }

    pub fn add(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id.clone(), handle);
    }

    pub fn remove(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.connections.remove(connection_id).map(|(_, h)| h)
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    /// Claim the next broadcast sequence number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Broadcast an event to every connection. One sequence number is
    /// claimed per broadcast; a closed recipient is logged and skipped, it
    /// gets cleaned up when its socket task exits.
    pub fn broadcast(&self, event: impl Into<String>, payload: Value) -> u64 {
        let seq = self.next_seq();
        let frame = Frame::event(event, payload, seq);
        for entry in self.connections.iter() {
            if entry.value().send(frame.clone()).is_err() {
                debug!(connection = %entry.key(), "dropped broadcast to closed connection");
            }
        }
        seq
    }

    pub fn send_to(&self, connection_id: &str, frame: Frame) -> Result<(), ConnectionError> {
        match self.connections.get(connection_id) {
            Some(handle) => handle.send(frame),
            None => Err(ConnectionError::NotFound(connection_id.to_string())),
        }
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(id, "main", tx), rx)
    }

    #[test]
    fn broadcast_seq_is_monotone() {
        let pool = ConnectionPool::new(16);
        let (h, mut rx) = handle("c1");
        pool.add(h);

        let s1 = pool.broadcast("heartbeat", json!({}));
        let s2 = pool.broadcast("heartbeat", json!({}));
        assert!(s2 > s1);

        match rx.try_recv().unwrap() {
            Frame::Event { seq, .. } => assert_eq!(seq, Some(s1)),
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn closed_recipient_does_not_poison_broadcast() {
        let pool = ConnectionPool::new(16);
        let (dead, dead_rx) = handle("dead");
        drop(dead_rx);
        pool.add(dead);
        let (live, mut live_rx) = handle("live");
        pool.add(live);

        pool.broadcast("heartbeat", json!({"n": 1}));
        assert!(matches!(live_rx.try_recv().unwrap(), Frame::Event { .. }));
    }

    #[test]
    fn pool_capacity_is_enforced_by_is_full() {
        let pool = ConnectionPool::new(1);
        assert!(!pool.is_full());
        let (h, _rx) = handle("c1");
        pool.add(h);
        assert!(pool.is_full());
    }

    #[test]
    fn authenticated_flag_is_shared_between_clones() {
        let (h, _rx) = handle("c1");
        let clone = h.clone();
        assert!(!clone.is_authenticated());
        h.mark_authenticated();
        assert!(clone.is_authenticated());
    }
}
