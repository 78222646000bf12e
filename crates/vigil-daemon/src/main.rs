//! Vigil binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_core::config::VigilConfig;
use vigil_core::ledger::AcceptanceLedger;
use vigil_incident::Correlator;
use vigil_sensor::Watcher;

/// Vigil - runtime-integrity auditor for host security.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "~/.config/vigil/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the security watcher until interrupted.
    Watch,
    /// Record a risk acceptance in the ledger.
    Accept {
        /// Finding identifier (e.g. TOOL-003).
        finding_id: String,
        /// Why the risk is acceptable.
        #[arg(long)]
        reason: String,
        /// Mitigations in place; repeatable.
        #[arg(long = "mitigation")]
        mitigations: Vec<String>,
        /// Days until the acceptance expires.
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Principal accepting the risk.
        #[arg(long)]
        by: String,
    },
    /// Verify the ledger hash chain.
    Verify,
    /// Print ledger counts and active acceptances.
    Summary,
    /// Correlate the most recent events in the persisted event log.
    LastIncident,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::from_default_env());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config_path = expand_tilde(&args.config);
    let config = VigilConfig::load(&config_path).context("loading configuration")?;

    match args.command {
        Command::Watch => run_watcher(config).await,
        Command::Accept {
            finding_id,
            reason,
            mitigations,
            days,
            by,
        } => {
            let ledger = AcceptanceLedger::new(&config.ledger_path);
            let record = ledger.append(&finding_id, &reason, mitigations, days, &by)?;
            println!(
                "accepted {} until {} (by {})",
                record.finding_id,
                record.expires_at.format("%Y-%m-%d"),
                record.accepted_by
            );
            Ok(())
        }
        Command::Verify => {
            let ledger = AcceptanceLedger::new(&config.ledger_path);
            ledger.verify_chain()?;
            let count = ledger.load_all()?.len();
            println!("ledger chain verified ({count} records)");
            Ok(())
        }
        Command::Summary => {
            let ledger = AcceptanceLedger::new(&config.ledger_path);
            let summary = ledger.summary()?;
            println!(
                "total {}  active {}  expired {}",
                summary.total, summary.active, summary.expired
            );
            let mut findings: Vec<_> = summary.active_by_finding.into_iter().collect();
            findings.sort_by(|a, b| a.0.cmp(&b.0));
            for (finding_id, record) in findings {
                println!(
                    "  {} until {} (by {})",
                    finding_id,
                    record.expires_at.format("%Y-%m-%d"),
                    record.accepted_by
                );
            }
            Ok(())
        }
        Command::LastIncident => {
            let Some(event_log) = &config.event_log_path else {
                anyhow::bail!("no event_log_path configured; the watcher has nothing persisted");
            };
            let correlator = build_correlator(&config);
            match correlator.last_incident(event_log)? {
                Some(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                None => println!("no incident within the last hour"),
            }
            Ok(())
        }
    }
}

async fn run_watcher(config: VigilConfig) -> Result<()> {
    // Refuse to watch on top of a forged ledger history.
    let ledger = AcceptanceLedger::new(&config.ledger_path);
    ledger.initialize()?;
    ledger.verify_chain()?;

    let watcher = Arc::new(Watcher::new(config.watcher, config.event_log_path));

    let handle = Arc::clone(&watcher);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping watcher");
        handle.stop();
    });

    watcher.start().await
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn build_correlator(config: &VigilConfig) -> Correlator {
    let mut correlator = Correlator::new().with_audit_key_prefix(&config.watcher.key_prefix);
    if let Some(dir) = &config.watcher.transcript_dir {
        correlator = correlator.with_transcript_dir(dir);
    }
    if let Some(log) = &config.watcher.gateway_log_path {
        correlator = correlator.with_gateway_log(log);
    }
    correlator
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        return PathBuf::from("/tmp").join(rest);
    }
    PathBuf::from(path)
}
