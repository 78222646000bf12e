//! Serialized event sink.
//!
//! All monitors funnel into one channel; a single consumer prints the
//! operator line, appends the event to the optional JSON-lines log, and
//! runs the kill decision. One event at a time, in arrival order -- the
//! rate counter's check-then-act sequence is single-threaded by
//! construction.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vigil_core::event::WatchEvent;

use crate::kill_switch::{KillDecision, KillSwitch};
use crate::service::ServiceControl;

/// Drain events until every producer is gone. Persistence failures are
/// logged and skipped; they never abort processing.
pub async fn run_sink(
    mut rx: mpsc::Receiver<WatchEvent>,
    mut kill_switch: KillSwitch,
    control: Arc<dyn ServiceControl>,
    event_log: Option<PathBuf>,
) {
    while let Some(event) = rx.recv().await {
        println!("{}", event.console_line());

        if let Some(path) = &event_log {
            if let Err(e) = append_event(path, &event) {
                warn!(error = %e, "failed to persist event");
            }
        }

        match kill_switch.decide(event.severity, Utc::now()) {
            KillDecision::Kill => {
                warn!(severity = ?event.severity, "kill switch tripped, stopping monitored service");
                match control.stop().await {
                    Ok(()) => println!("[ACTION] monitored service stopped"),
                    Err(e) => println!("[ACTION] failed to stop monitored service: {e}"),
                }
                if let Some(delay) = kill_switch.restart_delay() {
                    let control = Arc::clone(&control);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        match control.start().await {
                            Ok(()) => info!("monitored service restarted after delay"),
                            Err(e) => warn!(error = %e, "deferred restart failed"),
                        }
                    });
                }
            }
            KillDecision::RateLimited => {
                println!("[ACTION] stop suppressed: hourly kill limit reached");
            }
            KillDecision::Disabled | KillDecision::Cooldown | KillDecision::BelowThreshold => {}
        }
    }
}

fn append_event(path: &Path, event: &WatchEvent) -> anyhow::Result<()> {
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;

    use vigil_core::config::KillSwitchConfig;
    use vigil_core::event::{source, EventKind, Severity};

    struct CountingControl {
        stops: AtomicU32,
        starts: AtomicU32,
        fail_stop: bool,
    }

    impl CountingControl {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stops: AtomicU32::new(0),
                starts: AtomicU32::new(0),
                fail_stop: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                stops: AtomicU32::new(0),
                starts: AtomicU32::new(0),
                fail_stop: true,
            })
        }
    }

    #[async_trait]
    impl ServiceControl for CountingControl {
        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                anyhow::bail!("stop refused");
            }
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn critical_event(message: &str) -> WatchEvent {
        WatchEvent::new(
            EventKind::SecretDetected,
            Severity::Critical,
            source::TRANSCRIPT,
            message,
        )
    }

    fn kill_switch(threshold: Option<Severity>, max_per_hour: u32) -> KillSwitch {
        KillSwitch::new(
            &KillSwitchConfig {
                threshold,
                max_per_hour,
                startup_cooldown_secs: 0,
                restart_delay_secs: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn one_stop_then_rate_limited() {
        let (tx, rx) = mpsc::channel(16);
        let control = CountingControl::new();
        let sink = tokio::spawn(run_sink(
            rx,
            kill_switch(Some(Severity::Critical), 1),
            Arc::clone(&control) as Arc<dyn ServiceControl>,
            None,
        ));

        tx.send(critical_event("first")).await.unwrap();
        tx.send(critical_event("second")).await.unwrap();
        drop(tx);
        sink.await.unwrap();

        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
        assert_eq!(control.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn below_threshold_never_acts() {
        let (tx, rx) = mpsc::channel(16);
        let control = CountingControl::new();
        let sink = tokio::spawn(run_sink(
            rx,
            kill_switch(Some(Severity::Critical), 5),
            Arc::clone(&control) as Arc<dyn ServiceControl>,
            None,
        ));

        tx.send(WatchEvent::new(
            EventKind::FileAccess,
            Severity::High,
            source::AUDIT_LOG,
            "high but not critical",
        ))
        .await
        .unwrap();
        drop(tx);
        sink.await.unwrap();

        assert_eq!(control.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_failure_does_not_abort_the_sink() {
        let (tx, rx) = mpsc::channel(16);
        let control = CountingControl::failing();
        let sink = tokio::spawn(run_sink(
            rx,
            kill_switch(Some(Severity::Critical), 5),
            Arc::clone(&control) as Arc<dyn ServiceControl>,
            None,
        ));

        tx.send(critical_event("first")).await.unwrap();
        tx.send(critical_event("second")).await.unwrap();
        drop(tx);
        sink.await.unwrap();

        // Both events evaluated; both attempts made despite failures.
        assert_eq!(control.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn events_are_persisted_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("events.jsonl");

        let (tx, rx) = mpsc::channel(16);
        let control = CountingControl::new();
        let sink = tokio::spawn(run_sink(
            rx,
            kill_switch(None, 1),
            Arc::clone(&control) as Arc<dyn ServiceControl>,
            Some(log_path.clone()),
        ));

        tx.send(critical_event("persist me")).await.unwrap();
        tx.send(critical_event("me too")).await.unwrap();
        drop(tx);
        sink.await.unwrap();

        let raw = std::fs::read_to_string(&log_path).unwrap();
        let events: Vec<WatchEvent> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "persist me");
        // Threshold is off: no action was taken.
        assert_eq!(control.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deferred_restart_runs_after_delay() {
        let (tx, rx) = mpsc::channel(16);
        let control = CountingControl::new();
        let switch = KillSwitch::new(
            &KillSwitchConfig {
                threshold: Some(Severity::Critical),
                max_per_hour: 1,
                startup_cooldown_secs: 0,
                restart_delay_secs: Some(0),
            },
            Utc::now(),
        );
        let sink = tokio::spawn(run_sink(
            rx,
            switch,
            Arc::clone(&control) as Arc<dyn ServiceControl>,
            None,
        ));

        tx.send(critical_event("tripped")).await.unwrap();
        drop(tx);
        sink.await.unwrap();

        // The restart task was spawned with zero delay; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(control.stops.load(Ordering::SeqCst), 1);
        assert_eq!(control.starts.load(Ordering::SeqCst), 1);
    }
}
