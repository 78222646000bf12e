//! Service-control and account-resolution collaborators.
//!
//! The watcher treats the protective stop/start as fallible commands that
//! report failure instead of panicking or retrying on their own.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Stop/start capability for the monitored service.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Attempt to stop the service. `Ok(())` means the service is down.
    async fn stop(&self) -> Result<()>;

    /// Attempt to start the service.
    async fn start(&self) -> Result<()>;
}

/// Controls a systemd unit, falling back to process-match termination when
/// the unit stop fails.
pub struct SystemdControl {
    unit: String,
}

impl SystemdControl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

#[async_trait]
impl ServiceControl for SystemdControl {
    async fn stop(&self) -> Result<()> {
        let status = Command::new("systemctl")
            .arg("stop")
            .arg(&self.unit)
            .status()
            .await
            .context("running systemctl stop")?;

        if status.success() {
            info!(unit = %self.unit, "service stopped");
            return Ok(());
        }

        warn!(
            unit = %self.unit,
            code = ?status.code(),
            "systemctl stop failed, falling back to process-match termination"
        );

        let pattern = self.unit.trim_end_matches(".service");
        let status = Command::new("pkill")
            .arg("-f")
            .arg(pattern)
            .status()
            .await
            .context("running pkill fallback")?;

        if status.success() {
            info!(pattern, "service processes terminated");
            Ok(())
        } else {
            anyhow::bail!("could not stop {}: unit stop and pkill both failed", self.unit)
        }
    }

    async fn start(&self) -> Result<()> {
        let status = Command::new("systemctl")
            .arg("start")
            .arg(&self.unit)
            .status()
            .await
            .context("running systemctl start")?;

        if status.success() {
            info!(unit = %self.unit, "service started");
            Ok(())
        } else {
            anyhow::bail!("systemctl start {} exited with {:?}", self.unit, status.code())
        }
    }
}

/// Resolve the numeric uid of the service account. Best-effort: `None`
/// disables uid filtering downstream, it never fails startup.
pub async fn resolve_service_uid(user: &str) -> Option<u32> {
    let output = Command::new("id").arg("-u").arg(user).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
