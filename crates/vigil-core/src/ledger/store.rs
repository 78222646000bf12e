//! File-backed ledger store.
//!
//! One JSON record per line, append-only, never rewritten. Readers only
//! trust complete newline-terminated lines, so a concurrently growing file
//! cannot yield a torn record.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::warn;

use super::{hash_record, LedgerError, LedgerSummary, Result, RiskAcceptance, GENESIS_HASH};

/// Hash prefix length used in chain-divergence reports.
const HASH_PREFIX_LEN: usize = 12;

/// Append-only, hash-chained store of risk-acceptance records.
pub struct AcceptanceLedger {
    path: PathBuf,
}

impl AcceptanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the backing directory and file with owner-only permissions.
    /// Idempotent: a no-op when the store already exists.
    pub fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
            }
        }
        if !self.path.exists() {
            OpenOptions::new()
                .create_new(true)
                .append(true)
                .open(&self.path)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Append a new acceptance. Refuses to extend a chain that fails
    /// verification, so a forged history is never built upon.
    pub fn append(
        &self,
        finding_id: &str,
        reason: &str,
        mitigations: Vec<String>,
        expiration_days: i64,
        accepted_by: &str,
    ) -> Result<RiskAcceptance> {
        self.initialize()?;
        self.verify_chain()?;

        let prev_hash = match self.complete_lines()?.last() {
            Some(line) => hash_record(line.as_bytes()),
            None => GENESIS_HASH.to_string(),
        };

        let now = Utc::now();
        let record = RiskAcceptance {
            finding_id: finding_id.to_string(),
            accepted_at: now,
            accepted_by: accepted_by.to_string(),
            reason: reason.to_string(),
            mitigations,
            expires_at: now + Duration::days(expiration_days),
            prev_hash,
        };

        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;

        Ok(record)
    }

    /// All well-formed records, oldest first. Malformed lines are logged and
    /// skipped here; chain verification treats them as a break.
    pub fn load_all(&self) -> Result<Vec<RiskAcceptance>> {
        let mut records = Vec::new();
        for (index, line) in self.complete_lines()?.iter().enumerate() {
            match serde_json::from_str::<RiskAcceptance>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(line = index, error = %e, "skipping malformed ledger record");
                }
            }
        }
        Ok(records)
    }

    /// The most recent non-expired record for a finding. Expired records are
    /// treated as absent even though they remain on disk.
    pub fn get(&self, finding_id: &str) -> Result<Option<RiskAcceptance>> {
        let now = Utc::now();
        Ok(self
            .load_all()?
            .into_iter()
            .rev()
            .find(|r| r.finding_id == finding_id && r.is_active(now)))
    }

    /// Walk the chain oldest-first, recomputing the expected predecessor
    /// hash at each step. Returns the first divergence with prefixes of both
    /// hashes. A malformed line counts as a break, not a skip.
    pub fn verify_chain(&self) -> Result<()> {
        let mut expected = GENESIS_HASH.to_string();
        for (index, line) in self.complete_lines()?.iter().enumerate() {
            let record: RiskAcceptance =
                serde_json::from_str(line).map_err(|e| LedgerError::MalformedRecord {
                    line: index,
                    reason: e.to_string(),
                })?;
            if record.prev_hash != expected {
                return Err(LedgerError::ChainBroken {
                    index,
                    expected: hash_prefix(&expected),
                    found: hash_prefix(&record.prev_hash),
                });
            }
            expected = hash_record(line.as_bytes());
        }
        Ok(())
    }

    /// Total/active/expired counts plus the latest active record per
    /// finding.
    pub fn summary(&self) -> Result<LedgerSummary> {
        let now = Utc::now();
        let mut summary = LedgerSummary::default();
        let mut active_by_finding: HashMap<String, RiskAcceptance> = HashMap::new();

        for record in self.load_all()? {
            summary.total += 1;
            if record.is_active(now) {
                summary.active += 1;
                active_by_finding.insert(record.finding_id.clone(), record);
            } else {
                summary.expired += 1;
            }
        }

        summary.active_by_finding = active_by_finding;
        Ok(summary)
    }

    /// Complete, newline-terminated lines from the backing file. A missing
    /// file reads as an empty ledger; a trailing partial line is ignored.
    fn complete_lines(&self) -> Result<Vec<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .split_inclusive('\n')
            .filter(|l| l.ends_with('\n'))
            .map(|l| l.trim_end_matches(['\n', '\r']).to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

fn hash_prefix(hash: &str) -> String {
    hash.chars().take(HASH_PREFIX_LEN).collect()
}
