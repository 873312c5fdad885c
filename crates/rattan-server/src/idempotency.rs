//! Request idempotency cache.
//!
//! A request carrying an `idempotency_key` executes at most once per TTL
//! window. The key is reserved before dispatch: a retry arriving while the
//! original is still in flight waits for that outcome instead of executing
//! again, and a retry after completion replays the cached response
//! re-tagged with the new request id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rattan_core::{ErrorBody, Frame};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// Outcome of a completed keyed request.
#[derive(Clone)]
pub struct CachedOutcome {
    ok: bool,
    payload: Option<Value>,
    error: Option<ErrorBody>,
}

impl CachedOutcome {
    /// Rebuild the response under a fresh request id.
    pub fn frame(&self, id: &str) -> Frame {
        Frame::Response {
            id: id.to_string(),
            ok: self.ok,
            payload: self.payload.clone(),
            error: self.error.clone(),
        }
    }
}

struct Slot {
    outcome: watch::Sender<Option<CachedOutcome>>,
    claimed_at: Instant,
}

/// What a caller holding an idempotency key must do next.
pub enum Claim {
    /// The key is fresh: run the request and report it via
    /// [`IdempotencyCache::complete`].
    Execute,
    /// The key completed inside the TTL: replay this response.
    Replay(Frame),
    /// The key is in flight on another caller: wait for its outcome.
    Wait(watch::Receiver<Option<CachedOutcome>>),
}

pub struct IdempotencyCache {
    entries: DashMap<String, Slot>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Claim a key before dispatching. Exactly one concurrent caller gets
    /// [`Claim::Execute`]; the rest replay the cached outcome or wait for
    /// the in-flight one. An abandoned claim ages out with the TTL.
    pub fn begin(&self, key: &str, id: &str) -> Claim {
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                let (tx, _) = watch::channel(None);
                entry.insert(Slot {
                    outcome: tx,
                    claimed_at: Instant::now(),
                });
                Claim::Execute
            }
            Entry::Occupied(mut entry) => {
                if entry.get().claimed_at.elapsed() > self.ttl {
                    let (tx, _) = watch::channel(None);
                    entry.insert(Slot {
                        outcome: tx,
                        claimed_at: Instant::now(),
                    });
                    return Claim::Execute;
                }
                let slot = entry.get();
                let completed = slot.outcome.borrow().clone();
                match completed {
                    Some(outcome) => {
                        debug!(key, "replaying idempotent request");
                        Claim::Replay(outcome.frame(id))
                    }
                    None => Claim::Wait(slot.outcome.subscribe()),
                }
            }
        }
    }

    /// Record the outcome of the executing caller and wake any waiters.
    /// Only response frames are cacheable; anything else releases the claim.
    pub fn complete(&self, key: &str, frame: &Frame) {
        if let Frame::Response {
            ok, payload, error, ..
        } = frame
        {
            if let Some(mut slot) = self.entries.get_mut(key) {
                slot.claimed_at = Instant::now();
                slot.outcome.send_replace(Some(CachedOutcome {
                    ok: *ok,
                    payload: payload.clone(),
                    error: error.clone(),
                }));
                return;
            }
        }
        self.entries.remove(key);
    }

    /// Drop expired entries. Removing a slot drops its watch sender, so a
    /// waiter stuck on an abandoned claim wakes up and takes over.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| slot.claimed_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
