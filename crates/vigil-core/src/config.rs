//! Application settings and TOML configuration parsing.
//!
//! Everything the watcher and correlator consume is parsed up front into a
//! closed, validated struct. Missing fields default explicitly; unknown
//! severity strings or malformed TOML fail the load.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::event::Severity;

/// Top-level Vigil configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Path to the JSON-lines acceptance ledger.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Optional JSON-lines event log written by the watcher and read back by
    /// the incident correlator.
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,

    /// Watcher settings.
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            event_log_path: None,
            watcher: WatcherConfig::default(),
        }
    }
}

impl VigilConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Settings for the security watcher and its monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Line-oriented audit log consumed by the tail monitor.
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    /// Audit key prefix marking lines of interest.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Configuration tree watched for changes.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    /// Session-transcript tree scanned for secret-like content.
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,

    /// Gateway log referenced as incident evidence.
    #[serde(default)]
    pub gateway_log_path: Option<PathBuf>,

    /// Service unit the kill switch stops.
    #[serde(default = "default_service_unit")]
    pub service_unit: String,

    /// Account the monitored service runs as. Used only for event
    /// filtering; unresolvable accounts disable the filter.
    #[serde(default)]
    pub service_user: Option<String>,

    /// Monitor poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Kill-switch settings.
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            audit_log_path: default_audit_log_path(),
            key_prefix: default_key_prefix(),
            config_dir: None,
            transcript_dir: None,
            gateway_log_path: None,
            service_unit: default_service_unit(),
            service_user: None,
            poll_interval_ms: default_poll_interval_ms(),
            kill_switch: KillSwitchConfig::default(),
        }
    }
}

/// Kill-switch thresholds and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Minimum severity that triggers a stop. Absent disables the switch.
    #[serde(default)]
    pub threshold: Option<Severity>,

    /// Maximum autonomous stops per hour.
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,

    /// Grace period after watcher start during which the switch is inert.
    #[serde(default = "default_startup_cooldown_secs")]
    pub startup_cooldown_secs: u64,

    /// Optional delay before a single automatic restart of the unit after a
    /// stop.
    #[serde(default)]
    pub restart_delay_secs: Option<u64>,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            max_per_hour: default_max_per_hour(),
            startup_cooldown_secs: default_startup_cooldown_secs(),
            restart_delay_secs: None,
        }
    }
}

fn default_ledger_path() -> PathBuf {
    home_relative(".local/share/vigil/acceptances.jsonl")
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/audit/audit.log")
}

fn default_key_prefix() -> String {
    "vigil-".to_string()
}

fn default_service_unit() -> String {
    "agent-gateway.service".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_per_hour() -> u32 {
    3
}

fn default_startup_cooldown_secs() -> u64 {
    60
}

fn home_relative(relative: &str) -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(relative)
    } else {
        PathBuf::from("/tmp").join(relative)
    }
}
