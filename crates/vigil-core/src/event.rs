//! Event types for Vigil.
//!
//! Events are the fundamental data unit flowing through the watcher. Each
//! monitor produces [`WatchEvent`]s; the event sink prints them, optionally
//! persists them as JSON lines, and feeds them to the kill switch. The
//! incident correlator consumes the same type when reconstructing what
//! happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level for an event, used by the kill switch and report renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required.
    Info,
    /// Worth reviewing.
    Warning,
    /// Likely requires operator attention.
    High,
    /// Immediate action recommended.
    Critical,
}

impl Severity {
    /// Uppercase label used on the operator stream.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Closed set of event categories the monitors can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FileAccess,
    ConfigChange,
    SecretDetected,
    ProcessSpawn,
}

/// Source tags identifying which monitor produced an event.
pub mod source {
    pub const AUDIT_LOG: &str = "audit-log";
    pub const CONFIG_DIR: &str = "config-dir";
    pub const TRANSCRIPT: &str = "transcript";
}

/// A single classified event. Immutable once created: it is printed,
/// persisted, or discarded, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    /// Which monitor produced the event (see [`source`]).
    pub source: String,
    /// One-line human-readable description.
    pub message: String,
    /// Open-ended structured payload, monitor-specific.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl WatchEvent {
    pub fn new(
        kind: EventKind,
        severity: Severity,
        source: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            severity,
            source: source.to_string(),
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Operator-facing line, severity-prefixed.
    pub fn console_line(&self) -> String {
        format!("[{}] {}", self.severity.label(), self.message)
    }
}
