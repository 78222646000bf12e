//! Watcher lifecycle and monitor orchestration.
//!
//! A [`Watcher`] is constructed per run and owns all of its state; there are
//! no process-wide singletons. `start` launches the monitors and does not
//! return until every one of them has observed the stop flag and exited.
//! `stop` is idempotent and safe to call before `start` has finished
//! initializing.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use vigil_core::config::WatcherConfig;

use crate::kill_switch::KillSwitch;
use crate::monitors::{audit_log, config_dir, transcript, RunFlag};
use crate::service::{resolve_service_uid, ServiceControl, SystemdControl};
use crate::sink::run_sink;

/// Debounce window for configuration-directory changes.
const CONFIG_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(500);

/// Watcher lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Runs the monitors, the event sink, and the kill switch for one session.
pub struct Watcher {
    config: WatcherConfig,
    event_log: Option<PathBuf>,
    control: Arc<dyn ServiceControl>,
    flag: RunFlag,
    state: Arc<Mutex<WatcherState>>,
}

impl Watcher {
    pub fn new(config: WatcherConfig, event_log: Option<PathBuf>) -> Self {
        let control = Arc::new(SystemdControl::new(&config.service_unit));
        Self {
            config,
            event_log,
            control,
            flag: RunFlag::new(),
            state: Arc::new(Mutex::new(WatcherState::Stopped)),
        }
    }

    /// Replace the service controller. Used by tests and by callers with a
    /// non-systemd service manager.
    pub fn with_control(mut self, control: Arc<dyn ServiceControl>) -> Self {
        self.control = control;
        self
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock().unwrap()
    }

    /// Signal all monitors to stop. Safe to call repeatedly, from any task,
    /// and before `start` has finished initializing.
    pub fn stop(&self) {
        self.flag.stop();
    }

    /// Run all monitors until [`Watcher::stop`] is called. Returns only
    /// after every monitor has observed the stop flag and exited and the
    /// sink has drained.
    pub async fn start(&self) -> Result<()> {
        self.set_state(WatcherState::Starting);

        // Best-effort account resolution; absence disables uid filtering.
        let uid = match &self.config.service_user {
            Some(user) => {
                let uid = resolve_service_uid(user).await;
                if uid.is_none() {
                    warn!(user = %user, "could not resolve service account, uid filtering disabled");
                }
                uid
            }
            None => None,
        };

        let (tx, rx) = mpsc::channel(1024);
        let kill_switch = KillSwitch::new(&self.config.kill_switch, Utc::now());
        let sink = tokio::spawn(run_sink(
            rx,
            kill_switch,
            Arc::clone(&self.control),
            self.event_log.clone(),
        ));

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut monitors = Vec::new();

        monitors.push(tokio::spawn(audit_log::run(
            self.config.audit_log_path.clone(),
            self.config.key_prefix.clone(),
            uid,
            poll,
            self.flag.clone(),
            tx.clone(),
        )));

        if let Some(dir) = &self.config.config_dir {
            monitors.push(tokio::spawn(config_dir::run(
                dir.clone(),
                CONFIG_DEBOUNCE,
                self.flag.clone(),
                tx.clone(),
            )));
        }

        if let Some(dir) = &self.config.transcript_dir {
            monitors.push(tokio::spawn(transcript::run(
                dir.clone(),
                self.flag.clone(),
                tx.clone(),
            )));
        }

        // The sink exits once every sender is gone.
        drop(tx);

        self.set_state(WatcherState::Running);
        info!(monitors = monitors.len(), "watcher running");

        for monitor in monitors {
            let _ = monitor.await;
        }

        self.set_state(WatcherState::Stopping);
        let _ = sink.await;

        self.set_state(WatcherState::Stopped);
        info!("watcher stopped");
        Ok(())
    }

    fn set_state(&self, state: WatcherState) {
        *self.state.lock().unwrap() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn quiet_config(dir: &tempfile::TempDir) -> WatcherConfig {
        WatcherConfig {
            audit_log_path: dir.path().join("missing-audit.log"),
            poll_interval_ms: 25,
            ..WatcherConfig::default()
        }
    }

    #[tokio::test]
    async fn start_returns_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Arc::new(Watcher::new(quiet_config(&dir), None));

        let handle = Arc::clone(&watcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.stop();
        });

        timeout(Duration::from_secs(5), watcher.start())
            .await
            .expect("watcher did not stop in time")
            .unwrap();
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_clean_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = Watcher::new(quiet_config(&dir), None);

        watcher.stop();
        watcher.stop(); // idempotent

        timeout(Duration::from_secs(5), watcher.start())
            .await
            .expect("cancelled start did not return promptly")
            .unwrap();
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn all_monitors_launch_when_sources_exist() {
        let dir = tempfile::tempdir().unwrap();
        let audit = dir.path().join("audit.log");
        std::fs::write(&audit, "").unwrap();
        let config_dir = dir.path().join("conf");
        let transcript_dir = dir.path().join("transcripts");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::create_dir_all(&transcript_dir).unwrap();

        let config = WatcherConfig {
            audit_log_path: audit,
            config_dir: Some(config_dir),
            transcript_dir: Some(transcript_dir),
            poll_interval_ms: 25,
            ..WatcherConfig::default()
        };
        let watcher = Arc::new(Watcher::new(config, None));

        let handle = Arc::clone(&watcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.stop();
        });

        timeout(Duration::from_secs(5), watcher.start())
            .await
            .expect("watcher did not stop in time")
            .unwrap();
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }
}
