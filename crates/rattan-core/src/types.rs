//! Shared message and routing types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single history entry. Immutable once appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Sender id on the originating channel, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Channel the message arrived on, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            sender: None,
            channel: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool message
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }

    /// Attach channel provenance
    pub fn with_source(
        mut self,
        channel: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        self.channel = Some(channel.into());
        self.sender = Some(sender.into());
        self
    }

    /// Attach free-form metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A message as normalized by a channel adapter on receipt.
///
/// Consumed once by the router/gateway and then discarded; the interesting
/// parts are copied into a [`Message`] when it lands in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Adapter id the message arrived through
    pub channel_id: String,
    /// Platform-specific sender id
    pub sender_id: String,
    /// Raw message text
    pub text: String,
    /// Whether the platform delivered this over an encrypted transport
    #[serde(default)]
    pub encrypted: bool,
    /// Channel-specific metadata, passed through untouched
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn new(
        channel_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            encrypted: false,
            metadata: HashMap::new(),
        }
    }
}

/// How the router arrived at a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteIntent {
    /// An explicit in-text domain command won
    ExplicitCommand,
    /// Fell back to the channel's configured default domain
    ImplicitChannelDefault,
}

/// Pure output of the domain router. Never persisted; only used to select
/// or create a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub domain: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub intent: RouteIntent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_assign_id_and_timestamp() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(!m.id.is_empty());
        assert!(m.sender.is_none());
    }

    #[test]
    fn with_source_records_provenance() {
        let m = Message::user("hi").with_source("whatsapp", "alice");
        assert_eq!(m.channel.as_deref(), Some("whatsapp"));
        assert_eq!(m.sender.as_deref(), Some("alice"));
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
