//! Session manager.
//!
//! The single shared mutable resource of the gateway: all session mutation
//! (create / append / delete) goes through here. Each session sits behind its
//! own `tokio::sync::RwLock`, so updates to one session are serialized while
//! different sessions proceed concurrently. The domain index makes
//! domain-session creation an atomic check-then-create.

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rattan_core::Message;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::store::SnapshotStore;
use crate::types::{
    CreateSessionOptions, MessageDraft, Session, SessionKind, SessionSummary, MAIN_SESSION_ID,
};

type SessionHandle = Arc<RwLock<Session>>;

/// History bounding policy.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// History length that triggers a trim
    pub history_cap: usize,
    /// Most-recent entries kept after a trim
    pub history_trim: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            history_cap: 1000,
            history_trim: 500,
        }
    }
}

/// Owns the directory of conversation sessions.
pub struct SessionManager {
    config: SessionManagerConfig,
    store: Arc<dyn SnapshotStore>,
    sessions: DashMap<String, SessionHandle>,
    /// domain name -> session id; the single mutation point for the
    /// domain-session uniqueness invariant
    domains: DashMap<String, String>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            config,
            store,
            sessions: DashMap::new(),
            domains: DashMap::new(),
        }
    }

    /// Load persisted snapshots and (re)materialize the main session.
    /// Must run before the gateway accepts connections.
    pub async fn load(&self) -> SessionResult<usize> {
        let snapshots = self.store.load_all().await?;
        let count = snapshots.len();

        for session in snapshots {
            if let Some(domain) = session.domain.clone() {
                self.domains.insert(domain, session.id.clone());
            }
            self.sessions
                .insert(session.id.clone(), Arc::new(RwLock::new(session)));
        }

        if !self.sessions.contains_key(MAIN_SESSION_ID) {
            let main = Session::new_main();
            self.store.save(&main).await?;
            self.sessions
                .insert(main.id.clone(), Arc::new(RwLock::new(main)));
            info!("created main session");
        } else {
            info!("resumed main session from snapshot");
        }

        Ok(count)
    }

    fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        // Clone the Arc out so no map guard is held across an await.
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    /// Create a session explicitly. `Domain` kind delegates to
    /// [`Self::get_or_create_domain_session`] so the uniqueness invariant has
    /// one enforcement point; `Main` returns the existing main session.
    pub async fn create_session(
        &self,
        kind: SessionKind,
        opts: CreateSessionOptions,
    ) -> SessionResult<Session> {
        match kind {
            SessionKind::Main => self.main_session().await,
            SessionKind::Domain => {
                let domain = opts
                    .domain
                    .ok_or_else(|| SessionError::Invalid("domain kind requires a domain".into()))?;
                self.get_or_create_domain_session(&domain).await
            }
            SessionKind::Group => {
                let mut session = Session::new_group();
                session.channel_id = opts.channel_id;
                if let Some(agent_id) = opts.agent_id {
                    session.agent_id = agent_id;
                }
                if let Some(metadata) = opts.metadata {
                    session.metadata = metadata;
                }

                // Creation is a mutation: the snapshot must be durable
                // before we report success.
                self.store.save(&session).await?;
                self.sessions
                    .insert(session.id.clone(), Arc::new(RwLock::new(session.clone())));
                debug!(session_id = %session.id, "created group session");
                Ok(session)
            }
        }
    }

    /// Fetch a copy of a session.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let handle = self.handle(session_id)?;
        let session = handle.read().await;
        Some(session.clone())
    }

    /// The main session. Present for the whole process lifetime once
    /// [`Self::load`] has run.
    pub async fn main_session(&self) -> SessionResult<Session> {
        self.get_session(MAIN_SESSION_ID)
            .await
            .ok_or_else(|| SessionError::NotFound {
                id: MAIN_SESSION_ID.to_string(),
            })
    }

    /// Get the unique session for a domain, creating it on first need.
    ///
    /// Idempotent under concurrent callers: the domain-index entry is the
    /// single mutation point, so two racing calls observe the same session
    /// id - never create-then-check.
    pub async fn get_or_create_domain_session(&self, domain: &str) -> SessionResult<Session> {
        // Fast path.
        if let Some(id) = self.domains.get(domain).map(|e| e.value().clone()) {
            if let Some(session) = self.get_session(&id).await {
                return Ok(session);
            }
        }

        let created = match self.domains.entry(domain.to_string()) {
            Entry::Occupied(entry) => {
                let id = entry.get().clone();
                drop(entry);
                match self.get_session(&id).await {
                    Some(session) => return Ok(session),
                    None => {
                        return Err(SessionError::NotFound { id });
                    }
                }
            }
            Entry::Vacant(entry) => {
                let session = Session::new_domain(domain);
                self.sessions
                    .insert(session.id.clone(), Arc::new(RwLock::new(session.clone())));
                entry.insert(session.id.clone());
                session
            }
        };

        // Persist outside the index guard. A racing caller may briefly see
        // the in-memory session before the snapshot lands; on write failure
        // the registration is rolled back and creation reported failed.
        if let Err(e) = self.store.save(&created).await {
            error!(session_id = %created.id, "failed to persist new domain session: {}", e);
            self.sessions.remove(&created.id);
            self.domains.remove(domain);
            return Err(e);
        }

        debug!(session_id = %created.id, domain, "created domain session");
        Ok(created)
    }

    /// Delete a session. The main session is never deleted: a hard
    /// invariant, not policy - the call is a no-op returning `false`.
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<bool> {
        if session_id == MAIN_SESSION_ID {
            return Ok(false);
        }

        let Some((_, handle)) = self.sessions.remove(session_id) else {
            return Ok(false);
        };

        let domain = handle.read().await.domain.clone();
        if let Some(domain) = domain {
            self.domains.remove(&domain);
        }

        self.store.delete(session_id).await?;
        debug!(session_id, "deleted session");
        Ok(true)
    }

    /// Append a message. Id and timestamp are assigned here; the history is
    /// trimmed to the most recent entries when it exceeds the cap.
    ///
    /// The snapshot write is best-effort: a failed write is logged and the
    /// in-memory append still succeeds.
    pub async fn add_message(
        &self,
        session_id: &str,
        draft: MessageDraft,
    ) -> SessionResult<Message> {
        let handle = self.handle(session_id).ok_or_else(|| SessionError::NotFound {
            id: session_id.to_string(),
        })?;

        let message = draft.into_message();

        // The write guard is held across the snapshot write so appends to
        // one session persist in order.
        let mut session = handle.write().await;
        session.history.push(message.clone());
        if session.history.len() > self.config.history_cap {
            let excess = session.history.len() - self.config.history_trim;
            session.history.drain(..excess);
            debug!(
                session_id,
                kept = self.config.history_trim,
                "trimmed session history"
            );
        }
        session.touch();

        if let Err(e) = self.store.save(&session).await {
            warn!(
                session_id,
                "snapshot write failed, keeping in-memory append: {}", e
            );
        }

        Ok(message)
    }

    /// The most recent `limit` history entries (all when `None`).
    pub async fn history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> SessionResult<Vec<Message>> {
        let handle = self.handle(session_id).ok_or_else(|| SessionError::NotFound {
            id: session_id.to_string(),
        })?;
        let session = handle.read().await;
        let history = &session.history;
        let start = match limit {
            Some(limit) if limit < history.len() => history.len() - limit,
            _ => 0,
        };
        Ok(history[start..].to_vec())
    }

    /// Summaries of every live session.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.read().await.summary());
        }
        summaries
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop group sessions untouched for longer than `max_age`.
    /// Main and domain sessions are never pruned.
    pub async fn prune_inactive(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;

        let handles: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut stale = Vec::new();
        for (id, handle) in handles {
            let session = handle.read().await;
            if session.kind == SessionKind::Group && session.updated_at < cutoff {
                stale.push(id);
            }
        }

        let mut pruned = 0;
        for id in stale {
            match self.delete_session(&id).await {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(e) => warn!(session_id = %id, "failed to prune session: {}", e),
            }
        }

        if pruned > 0 {
            info!(pruned, "pruned inactive group sessions");
        }
        pruned
    }
}
