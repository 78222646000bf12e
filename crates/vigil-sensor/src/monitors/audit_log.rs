//! Audit-log tail monitor.
//!
//! Incrementally reads a growing line-oriented audit log of `key=value`
//! tokens, keeping lines that carry the configured key prefix and (when the
//! service account resolved) match its uid. The log subsystem may rotate or
//! truncate the file underneath us; the monitor detects both and reopens
//! from the start instead of erroring out permanently.

use std::io::SeekFrom;
use std::path::PathBuf;

use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use vigil_core::event::{source, EventKind, Severity, WatchEvent};

use super::RunFlag;

/// Tag fragments whose access means key material was touched.
const SENSITIVE_TAG_MARKERS: &[&str] = &["ssh", "aws", "gcloud", "gpg"];

/// Tag fragments that indicate an execution rule rather than a file rule.
const EXEC_TAG_MARKERS: &[&str] = &["exec", "spawn"];

/// Loosely parsed audit line. Absent fields are omitted, never fatal.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub rtype: Option<String>,
    pub key: Option<String>,
    pub auid: Option<u32>,
    pub uid: Option<u32>,
    pub exe: Option<String>,
    pub name: Option<String>,
    pub success: Option<bool>,
}

/// Tolerant tokenizer for `key=value` and `key="quoted value"` fields.
/// Bare tokens and unknown fields are skipped silently.
pub fn parse_line(line: &str) -> AuditRecord {
    let mut record = AuditRecord::default();
    for (field, value) in fields(line) {
        match field {
            "type" => record.rtype = Some(value),
            "key" => record.key = Some(value),
            "auid" => record.auid = value.parse().ok(),
            "uid" => record.uid = value.parse().ok(),
            "exe" => record.exe = Some(value),
            "name" => record.name = Some(value),
            "success" => record.success = Some(value == "yes"),
            _ => {}
        }
    }
    record
}

fn fields(line: &str) -> Vec<(&str, String)> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue; // bare token without a value
        }
        let key = &line[start..i];
        i += 1;

        let value = if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            let vstart = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            let value = &line[vstart..i];
            if i < bytes.len() {
                i += 1; // closing quote
            }
            value
        } else {
            let vstart = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            &line[vstart..i]
        };

        out.push((key, value.to_string()));
    }

    out
}

/// Decide whether a parsed line becomes an event. `uid_filter` of `None`
/// means the service account could not be resolved, so no uid filtering
/// applies.
pub fn classify(record: &AuditRecord, key_prefix: &str, uid_filter: Option<u32>) -> Option<WatchEvent> {
    let key = record.key.as_deref()?;
    if !key.starts_with(key_prefix) {
        return None;
    }

    if let Some(uid) = uid_filter {
        if record.auid != Some(uid) && record.uid != Some(uid) {
            return None;
        }
    }

    let tag = &key[key_prefix.len()..];
    let kind = if EXEC_TAG_MARKERS.iter().any(|m| tag.contains(m)) {
        EventKind::ProcessSpawn
    } else {
        EventKind::FileAccess
    };
    let severity = if SENSITIVE_TAG_MARKERS.iter().any(|m| tag.contains(m)) {
        Severity::High
    } else {
        Severity::Warning
    };

    let resource = record.name.as_deref().unwrap_or("unknown resource");
    let message = match record.exe.as_deref() {
        Some(exe) => format!("{exe} touched {resource} (audit key {key})"),
        None => format!("access to {resource} (audit key {key})"),
    };

    Some(
        WatchEvent::new(kind, severity, source::AUDIT_LOG, message).with_details(json!({
            "type": record.rtype,
            "key": key,
            "auid": record.auid,
            "uid": record.uid,
            "exe": record.exe,
            "name": record.name,
            "success": record.success,
        })),
    )
}

/// Tail the audit log until the run flag clears. Starts at the current end
/// of the file so only new activity is reported.
pub async fn run(
    path: PathBuf,
    key_prefix: String,
    uid_filter: Option<u32>,
    poll: Duration,
    flag: RunFlag,
    tx: mpsc::Sender<WatchEvent>,
) {
    if !path.exists() {
        info!(path = %path.display(), "audit log not present, tail monitor idle");
        return;
    }

    let mut pos = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    let mut carry = String::new();

    while flag.is_running() {
        tokio::time::sleep(poll).await;

        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                // Rotated away; wait for the subsystem to recreate it.
                pos = 0;
                carry.clear();
                continue;
            }
        };

        if len < pos {
            warn!(path = %path.display(), "audit log shrank, reopening from start");
            pos = 0;
            carry.clear();
        }
        if len == pos {
            continue;
        }

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "could not reopen audit log");
                continue;
            }
        };
        if file.seek(SeekFrom::Start(pos)).await.is_err() {
            continue;
        }

        let mut buf = String::new();
        match file.read_to_string(&mut buf).await {
            Ok(n) => pos += n as u64,
            Err(e) => {
                warn!(error = %e, "error reading audit log");
                continue;
            }
        }
        carry.push_str(&buf);

        // Only complete lines; keep a trailing partial for the next poll.
        while let Some(idx) = carry.find('\n') {
            let line: String = carry.drain(..=idx).collect();
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let record = parse_line(line);
            if let Some(event) = classify(&record, &key_prefix, uid_filter) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
