//! Domain router.
//!
//! Maps an inbound message plus the channel's default domain to a routing
//! decision. Pure function: no I/O, no session mutation - the caller turns
//! the decision into a session lookup.
//!
//! Precedence:
//! 1. an explicit in-text domain command (`@domain` as the first token,
//!    matched against [`DOMAINS`]) wins with confidence 1.0;
//! 2. otherwise the channel's configured default domain applies with
//!    confidence 0.5.
//!
//! Deeper semantic classification is an external collaborator; the gateway
//! must function correctly without it, so no other scoring happens here.

use rattan_core::{InboundMessage, RouteDecision, RouteIntent};

/// The fixed table of cognitive domains.
pub const DOMAINS: &[&str] = &[
    "social",
    "productivity",
    "finance",
    "health",
    "knowledge",
    "system",
];

/// Reserved prefix marking an explicit domain command.
pub const COMMAND_PREFIX: char = '@';

/// Confidence assigned to an explicit `@domain` command.
pub const EXPLICIT_CONFIDENCE: f64 = 1.0;

/// Confidence assigned to the channel-default fallback.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Route one inbound message.
pub fn route(message: &InboundMessage, default_domain: &str) -> RouteDecision {
    if let Some(domain) = explicit_domain(&message.text) {
        return RouteDecision {
            domain: domain.to_string(),
            confidence: EXPLICIT_CONFIDENCE,
            intent: RouteIntent::ExplicitCommand,
        };
    }

    RouteDecision {
        domain: default_domain.to_string(),
        confidence: DEFAULT_CONFIDENCE,
        intent: RouteIntent::ImplicitChannelDefault,
    }
}

/// Check whether a domain name is in the fixed table.
pub fn is_known_domain(name: &str) -> bool {
    DOMAINS.contains(&name)
}

/// Extract an explicit domain command from the first token, if present.
///
/// Only a leading `@name` that matches the domain table counts; an `@` deep
/// in the text or an unknown name falls through to the channel default.
fn explicit_domain(text: &str) -> Option<&'static str> {
    let first = text.trim_start().split_whitespace().next()?;
    let name = first.strip_prefix(COMMAND_PREFIX)?;
    DOMAINS
        .iter()
        .find(|d| d.eq_ignore_ascii_case(name))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rattan_core::InboundMessage;

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage::new("test-channel", "alice", text)
    }

    #[test]
    fn explicit_command_wins_over_channel_default() {
        let decision = route(&inbound("@finance how did my stocks do"), "social");
        assert_eq!(decision.domain, "finance");
        assert_eq!(decision.confidence, EXPLICIT_CONFIDENCE);
        assert_eq!(decision.intent, RouteIntent::ExplicitCommand);
    }

    #[test]
    fn ordinary_text_falls_back_to_channel_default() {
        let decision = route(&inbound("lunch tomorrow?"), "social");
        assert_eq!(decision.domain, "social");
        assert_eq!(decision.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(decision.intent, RouteIntent::ImplicitChannelDefault);
    }

    #[test]
    fn unknown_domain_name_is_not_a_command() {
        let decision = route(&inbound("@nonsense hello"), "productivity");
        assert_eq!(decision.domain, "productivity");
        assert_eq!(decision.intent, RouteIntent::ImplicitChannelDefault);
    }

    #[test]
    fn prefix_must_lead_the_text() {
        let decision = route(&inbound("ping me @finance later"), "social");
        assert_eq!(decision.domain, "social");
    }

    #[test]
    fn command_matching_ignores_case() {
        let decision = route(&inbound("@Health sleep report"), "social");
        assert_eq!(decision.domain, "health");
        assert_eq!(decision.intent, RouteIntent::ExplicitCommand);
    }

    #[test]
    fn leading_whitespace_is_tolerated() {
        let decision = route(&inbound("  @knowledge what is rust"), "social");
        assert_eq!(decision.domain, "knowledge");
    }

    #[test]
    fn bare_prefix_is_not_a_command() {
        let decision = route(&inbound("@ hello"), "social");
        assert_eq!(decision.domain, "social");
    }

    #[test]
    fn known_domain_table() {
        assert!(is_known_domain("finance"));
        assert!(!is_known_domain("sports"));
    }
}
