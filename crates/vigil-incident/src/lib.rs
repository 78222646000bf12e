//! # vigil-incident
//!
//! Incident correlation: turns a bounded window of watch events plus the
//! ledger's active acceptances into a causal narrative with a timeline,
//! contributing accepted risks, evidence pointers, and recommendations.
//!
//! Contribution matching is best-effort triage keyed on acceptance id
//! prefixes. It narrows where to look first; it is not root-cause analysis.

pub mod rules;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_core::event::{source, EventKind, Severity, WatchEvent};
use vigil_core::ledger::RiskAcceptance;

use rules::{default_rules, CategoryRule};

/// Upper bound on transcript files listed as evidence.
const MAX_TRANSCRIPT_EVIDENCE: usize = 5;

/// A point-in-time finding from the configuration checkers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub message: String,
}

/// A heuristic link asserting that an accepted risk may have enabled an
/// observed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub acceptance_id: String,
    /// Rule category that produced the match (`CHANNEL`, `TOOL`, `NET`).
    pub category: String,
    /// Message of the event that supported the match.
    pub event_message: String,
    pub rationale: String,
}

/// A correlated incident narrative. Built fresh on each invocation and
/// never persisted here; persistence is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    /// Events in timestamp order.
    pub timeline: Vec<WatchEvent>,
    /// Snapshot of findings at correlation time.
    pub findings: Vec<Finding>,
    /// Snapshot of active acceptances at correlation time.
    pub acceptances: Vec<RiskAcceptance>,
    pub contributions: Vec<Contribution>,
    /// Pointers to look at, never file contents.
    pub evidence: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Builds incident reports from events and ledger context.
pub struct Correlator {
    rules: Vec<CategoryRule>,
    transcript_dir: Option<PathBuf>,
    gateway_log: Option<PathBuf>,
    audit_key_prefix: String,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            transcript_dir: None,
            gateway_log: None,
            audit_key_prefix: "vigil-".to_string(),
        }
    }

    pub fn with_transcript_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    pub fn with_gateway_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.gateway_log = Some(path.into());
        self
    }

    pub fn with_audit_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.audit_key_prefix = prefix.into();
        self
    }

    /// Swap the contribution rule set.
    pub fn with_rules(mut self, rules: Vec<CategoryRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Build a report from an event window, a findings snapshot, and the
    /// ledger's active acceptances.
    pub fn correlate(
        &self,
        events: &[WatchEvent],
        findings: &[Finding],
        acceptances: &[RiskAcceptance],
    ) -> IncidentReport {
        let mut timeline = events.to_vec();
        timeline.sort_by_key(|e| e.timestamp);

        let summary = timeline
            .iter()
            .find(|e| e.severity >= Severity::High)
            .or_else(|| timeline.first())
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown incident".to_string());

        let contributions = self.match_contributions(&timeline, acceptances);
        let evidence = self.collect_evidence(&timeline);
        let recommendations = recommend(&timeline, &contributions);

        IncidentReport {
            id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            summary,
            timeline,
            findings: findings.to_vec(),
            acceptances: acceptances.to_vec(),
            contributions,
            evidence,
            recommendations,
        }
    }

    /// Correlate the trailing window of a persisted event log: the most
    /// recent contiguous run of events within the last hour, scanning
    /// backward and stopping at the first older event. `None` when the log
    /// is missing, empty, or its newest event is already stale.
    pub fn last_incident(&self, event_log: &Path) -> Result<Option<IncidentReport>> {
        let raw = match fs::read_to_string(event_log) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let events: Vec<WatchEvent> = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed event line");
                    None
                }
            })
            .collect();

        let Some(newest) = events.last() else {
            return Ok(None);
        };
        let cutoff = Utc::now() - Duration::hours(1);
        if newest.timestamp < cutoff {
            return Ok(None);
        }

        let mut window: Vec<WatchEvent> = Vec::new();
        for event in events.iter().rev() {
            if event.timestamp < cutoff {
                break;
            }
            window.push(event.clone());
        }
        window.reverse();

        Ok(Some(self.correlate(&window, &[], &[])))
    }

    fn match_contributions(
        &self,
        events: &[WatchEvent],
        acceptances: &[RiskAcceptance],
    ) -> Vec<Contribution> {
        let now = Utc::now();
        let mut contributions = Vec::new();

        for acceptance in acceptances.iter().filter(|a| a.is_active(now)) {
            for rule in &self.rules {
                if !acceptance.finding_id.starts_with(rule.prefix) {
                    continue;
                }
                if let Some(event) = (rule.matches)(events) {
                    contributions.push(Contribution {
                        acceptance_id: acceptance.finding_id.clone(),
                        category: rule.prefix.trim_end_matches('-').to_string(),
                        event_message: event.message.clone(),
                        rationale: rule.rationale.to_string(),
                    });
                }
                break; // first matching category rule owns the acceptance
            }
        }

        contributions
    }

    fn collect_evidence(&self, events: &[WatchEvent]) -> Vec<String> {
        let mut evidence = Vec::new();

        if let (Some(dir), Some(first)) = (&self.transcript_dir, events.first()) {
            let date = first.timestamp.format("%Y-%m-%d").to_string();
            evidence.extend(transcripts_for_date(dir, &date));
        }

        if let Some(log) = &self.gateway_log {
            if log.exists() {
                evidence.push(log.display().to_string());
            }
        }

        if events.iter().any(|e| e.source == source::AUDIT_LOG) {
            evidence.push(format!("ausearch -k {}", self.audit_key_prefix));
        }

        evidence
    }
}

/// List transcript files whose names carry the incident date. Bounded and
/// sorted; contents are never read.
fn transcripts_for_date(dir: &Path, date: &str) -> Vec<String> {
    let mut matches = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(date))
            {
                matches.push(path.display().to_string());
            }
        }
    }

    matches.sort();
    matches.truncate(MAX_TRANSCRIPT_EVIDENCE);
    matches
}

fn recommend(events: &[WatchEvent], contributions: &[Contribution]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if events.iter().any(|e| e.kind == EventKind::FileAccess) {
        push_unique(
            &mut out,
            "Enable filesystem sandboxing for the monitored service",
        );
    }
    if events.iter().any(|e| e.kind == EventKind::SecretDetected) {
        push_unique(
            &mut out,
            "Rotate any credentials that may have appeared in transcripts",
        );
    }
    if events.iter().any(|e| e.kind == EventKind::ConfigChange) {
        push_unique(
            &mut out,
            "Review recent configuration changes for unauthorized edits",
        );
    }

    for contribution in contributions {
        match contribution.category.as_str() {
            "CHANNEL" => push_unique(&mut out, "Restrict active channels to an explicit allowlist"),
            "TOOL" => push_unique(&mut out, "Re-evaluate sandbox and tool-permission settings"),
            _ => {}
        }
    }

    out
}

fn push_unique(out: &mut Vec<String>, advice: &str) {
    if !out.iter().any(|existing| existing == advice) {
        out.push(advice.to_string());
    }
}
