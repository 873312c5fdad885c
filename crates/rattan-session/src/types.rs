//! Session data model.

use chrono::{DateTime, Utc};
use rattan_core::{Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The one main session carries this fixed id so restarts rebind it.
pub const MAIN_SESSION_ID: &str = "main";

/// Session kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// The single process-lifetime session; cannot be deleted
    Main,
    /// Per-channel conversation, pruned after inactivity
    Group,
    /// Per-domain conversation, unique per domain name
    Domain,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Main => write!(f, "main"),
            SessionKind::Group => write!(f, "group"),
            SessionKind::Domain => write!(f, "domain"),
        }
    }
}

/// The unit of conversational isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered, bounded message history
    pub history: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    fn base(id: impl Into<String>, kind: SessionKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            channel_id: None,
            domain: None,
            agent_id: "default".to_string(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// The main session, fixed id
    pub fn new_main() -> Self {
        Self::base(MAIN_SESSION_ID, SessionKind::Main)
    }

    /// A group session, fresh id
    pub fn new_group() -> Self {
        Self::base(uuid::Uuid::new_v4().to_string(), SessionKind::Group)
    }

    /// A domain session, fresh id, bound to one domain name
    pub fn new_domain(domain: impl Into<String>) -> Self {
        let mut session = Self::base(uuid::Uuid::new_v4().to_string(), SessionKind::Domain);
        session.domain = Some(domain.into());
        session
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Metadata-only view for listings
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            kind: self.kind,
            channel_id: self.channel_id.clone(),
            domain: self.domain.clone(),
            agent_id: self.agent_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.history.len(),
        }
    }
}

/// What `session.list` returns: everything but the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Options for explicit session creation.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub channel_id: Option<String>,
    pub domain: Option<String>,
    pub agent_id: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// The caller-supplied part of a history entry; id and timestamp are
/// assigned on append.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub role: Role,
    pub content: String,
    pub sender: Option<String>,
    pub channel: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl MessageDraft {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sender: None,
            channel: None,
            metadata: None,
        }
    }

    pub fn with_source(
        mut self,
        channel: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        self.channel = Some(channel.into());
        self.sender = Some(sender.into());
        self
    }

    pub(crate) fn into_message(self) -> Message {
        let mut message = match self.role {
            Role::User => Message::user(self.content),
            Role::Assistant => Message::assistant(self.content),
            Role::System => Message::system(self.content),
            Role::Tool => Message::tool(self.content),
        };
        message.sender = self.sender;
        message.channel = self.channel;
        message.metadata = self.metadata;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_session_has_fixed_id() {
        let session = Session::new_main();
        assert_eq!(session.id, MAIN_SESSION_ID);
        assert_eq!(session.kind, SessionKind::Main);
    }

    #[test]
    fn domain_session_binds_domain() {
        let session = Session::new_domain("finance");
        assert_eq!(session.domain.as_deref(), Some("finance"));
        assert_eq!(session.kind, SessionKind::Domain);
        assert_ne!(session.id, MAIN_SESSION_ID);
    }

    #[test]
    fn draft_preserves_provenance() {
        let draft = MessageDraft::new(Role::User, "hi").with_source("telegram", "bob");
        let message = draft.into_message();
        assert_eq!(message.channel.as_deref(), Some("telegram"));
        assert_eq!(message.sender.as_deref(), Some("bob"));
    }
}
