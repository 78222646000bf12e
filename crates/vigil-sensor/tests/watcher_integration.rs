//! End-to-end watcher tests: audit lines flow through the sink into the
//! event log, and a qualifying event trips the kill switch exactly once.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use vigil_core::config::{KillSwitchConfig, WatcherConfig};
use vigil_core::event::{EventKind, Severity, WatchEvent};
use vigil_sensor::{ServiceControl, Watcher};

struct RecordingControl {
    stops: AtomicU32,
}

impl RecordingControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stops: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ServiceControl for RecordingControl {
    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }
}

fn audit_line(key: &str) -> String {
    format!(
        r#"type=SYSCALL auid=993 uid=993 exe="/usr/bin/cat" name="/home/agent/.ssh/id_ed25519" success=yes key="{key}""#
    )
}

#[tokio::test]
async fn audit_event_reaches_log_and_trips_kill_switch_once() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.log");
    let event_log = dir.path().join("events.jsonl");
    std::fs::write(&audit_path, "").unwrap();

    let config = WatcherConfig {
        audit_log_path: audit_path.clone(),
        poll_interval_ms: 25,
        kill_switch: KillSwitchConfig {
            threshold: Some(Severity::High),
            max_per_hour: 1,
            startup_cooldown_secs: 0,
            restart_delay_secs: None,
        },
        ..WatcherConfig::default()
    };

    let control = RecordingControl::new();
    let watcher = Arc::new(
        Watcher::new(config, Some(event_log.clone()))
            .with_control(Arc::clone(&control) as Arc<dyn ServiceControl>),
    );

    let runner = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.start().await })
    };

    // Let the tail monitor take its initial position, then append two
    // sensitive accesses. Both are high severity; only the first may stop
    // the service under a one-per-hour cap.
    tokio::time::sleep(Duration::from_millis(150)).await;
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&audit_path)
            .unwrap();
        writeln!(file, "{}", audit_line("vigil-ssh")).unwrap();
        writeln!(file, "{}", audit_line("vigil-ssh")).unwrap();
    }

    // Wait for both events to land in the event log.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = std::fs::read_to_string(&event_log)
            .map(|raw| raw.lines().count())
            .unwrap_or(0);
        if count >= 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "events never reached the log"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    watcher.stop();
    timeout(Duration::from_secs(5), runner)
        .await
        .expect("watcher did not shut down")
        .unwrap()
        .unwrap();

    let raw = std::fs::read_to_string(&event_log).unwrap();
    let events: Vec<WatchEvent> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.kind == EventKind::FileAccess && e.severity == Severity::High));

    assert_eq!(control.stops.load(Ordering::SeqCst), 1);
}
