//! Contribution-matching rules.
//!
//! An ordered list of `(prefix, predicate, rationale)` rules keyed on
//! acceptance id prefixes. String containment on event messages is
//! deliberately crude; the list is swappable so a better signal can replace
//! it without touching the correlator.

use vigil_core::event::{EventKind, WatchEvent};

/// Channel names the gateway may be configured with.
pub const KNOWN_CHANNELS: &[&str] = &[
    "telegram", "discord", "slack", "whatsapp", "signal", "matrix", "email",
];

/// Terms that indicate gateway or network surface involvement.
pub const GATEWAY_TERMS: &[&str] = &["gateway", "webhook", "listen", "port", "network"];

/// Finds the first event supporting a category, if any.
pub type EventPredicate = for<'a> fn(&'a [WatchEvent]) -> Option<&'a WatchEvent>;

/// One contribution-matching rule. An acceptance whose id starts with
/// `prefix` contributes when `matches` finds a supporting event.
pub struct CategoryRule {
    pub prefix: &'static str,
    pub rationale: &'static str,
    pub matches: EventPredicate,
}

fn channel_predicate(events: &[WatchEvent]) -> Option<&WatchEvent> {
    events.iter().find(|e| {
        let message = e.message.to_lowercase();
        KNOWN_CHANNELS.iter().any(|c| message.contains(c))
    })
}

fn tool_predicate(events: &[WatchEvent]) -> Option<&WatchEvent> {
    events.iter().find(|e| e.kind == EventKind::FileAccess)
}

fn network_predicate(events: &[WatchEvent]) -> Option<&WatchEvent> {
    events.iter().find(|e| {
        let message = e.message.to_lowercase();
        GATEWAY_TERMS.iter().any(|t| message.contains(t))
    })
}

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            prefix: "CHANNEL-",
            rationale: "an accepted channel exposure matches channel activity in the event window",
            matches: channel_predicate,
        },
        CategoryRule {
            prefix: "TOOL-",
            rationale: "an accepted tool risk coincides with file access by the monitored service",
            matches: tool_predicate,
        },
        CategoryRule {
            prefix: "NET-",
            rationale: "an accepted network exposure matches gateway activity in the event window",
            matches: network_predicate,
        },
    ]
}
