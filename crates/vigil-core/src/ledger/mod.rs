//! Risk-acceptance ledger.
//!
//! Accepted findings are recorded as [`RiskAcceptance`] entries in a
//! JSON-lines file forming a forward hash chain: every record stores the
//! SHA-256 digest of its predecessor's serialized line, so each record
//! commits to everything before it and silent edits to history are
//! detectable.

pub mod store;

pub use store::AcceptanceLedger;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hex digest used as `prev_hash` by the first record in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single risk-acceptance record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAcceptance {
    /// Identifier of the accepted finding (e.g. `TOOL-003`).
    pub finding_id: String,
    /// When the risk was accepted.
    pub accepted_at: DateTime<Utc>,
    /// Principal who accepted the risk.
    pub accepted_by: String,
    /// Free-text justification.
    pub reason: String,
    /// Mitigations in place while the risk is accepted.
    pub mitigations: Vec<String>,
    /// Expiry: the record stays on disk afterwards but stops counting as
    /// active.
    pub expires_at: DateTime<Utc>,
    /// SHA-256 hex digest of the previous record's serialized line, or
    /// [`GENESIS_HASH`] for the first record.
    pub prev_hash: String,
}

impl RiskAcceptance {
    /// A record is active until its expiry. Expiry changes logical status,
    /// not storage.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("hash chain broken at record {index}: expected {expected}.., found {found}..")]
    ChainBroken {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Counts plus the latest active record per finding.
#[derive(Debug, Clone, Default)]
pub struct LedgerSummary {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    /// Finding id to its most recent active record. Later non-expired
    /// records supersede earlier ones; all stay physically present.
    pub active_by_finding: HashMap<String, RiskAcceptance>,
}

/// SHA-256 hex digest of a serialized record line.
pub fn hash_record(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn hash_is_sha256_hex() {
        let hash = hash_record(b"record bytes");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_deterministic_and_input_sensitive() {
        assert_eq!(hash_record(b"same"), hash_record(b"same"));
        assert_ne!(hash_record(b"a"), hash_record(b"b"));
    }

    #[test]
    fn active_status_tracks_expiry() {
        let now = Utc::now();
        let record = RiskAcceptance {
            finding_id: "TOOL-001".into(),
            accepted_at: now,
            accepted_by: "ops".into(),
            reason: "sandbox rollout pending".into(),
            mitigations: vec!["weekly review".into()],
            expires_at: now + chrono::Duration::days(7),
            prev_hash: GENESIS_HASH.into(),
        };
        assert!(record.is_active(now));
        assert!(!record.is_active(now + chrono::Duration::days(8)));
    }
}
