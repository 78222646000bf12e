//! Configuration-directory monitor.
//!
//! Watches a configuration tree recursively and emits one `config_change`
//! event per settled path. Editor droppings and lock files churn fast and
//! carry no signal; they are dropped before debouncing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use notify::{Event as NotifyEvent, EventKind as NotifyKind, RecursiveMode, Watcher as _};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use vigil_core::event::{source, EventKind, Severity, WatchEvent};

use super::RunFlag;

/// Suffixes of transient files that editors and tools churn through.
const TRANSIENT_SUFFIXES: &[&str] = &[".swp", ".swx", ".tmp", ".lock", ".part", "~"];

/// Interval at which pending changes are flushed and the run flag checked.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub fn is_transient(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => {
            TRANSIENT_SUFFIXES.iter().any(|s| name.ends_with(s)) || name.starts_with(".#")
        }
        None => true,
    }
}

/// Per-path debounce: repeated writes within the window collapse into one
/// change.
pub struct ChangeDebouncer {
    window: std::time::Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl ChangeDebouncer {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn push(&mut self, path: PathBuf) {
        self.pending.entry(path).or_insert_with(Instant::now);
    }

    /// Paths whose debounce window has expired.
    pub fn flush(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, first_seen)| now.duration_since(**first_seen) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }
}

/// Watch a configuration tree until the run flag clears.
pub async fn run(
    dir: PathBuf,
    debounce: std::time::Duration,
    flag: RunFlag,
    tx: mpsc::Sender<WatchEvent>,
) {
    if !dir.is_dir() {
        info!(dir = %dir.display(), "config directory not present, monitor idle");
        return;
    }

    let (raw_tx, mut raw_rx) = mpsc::channel::<PathBuf>(256);
    let mut watcher =
        match notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    NotifyKind::Create(_) | NotifyKind::Modify(_) | NotifyKind::Remove(_)
                ) {
                    for path in event.paths {
                        if !is_transient(&path) {
                            let _ = raw_tx.try_send(path);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "config watcher error"),
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "failed to create config watcher");
                return;
            }
        };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::Recursive) {
        warn!(error = %e, dir = %dir.display(), "failed to watch config directory");
        return;
    }
    info!(dir = %dir.display(), "watching configuration tree");

    let mut debouncer = ChangeDebouncer::new(debounce);
    let mut tick = tokio::time::interval(TICK_INTERVAL);

    loop {
        if !flag.is_running() {
            return;
        }
        tokio::select! {
            maybe = raw_rx.recv() => match maybe {
                Some(path) => debouncer.push(path),
                None => return,
            },
            _ = tick.tick() => {
                for path in debouncer.flush() {
                    let event = WatchEvent::new(
                        EventKind::ConfigChange,
                        Severity::Warning,
                        source::CONFIG_DIR,
                        format!("configuration changed: {}", path.display()),
                    )
                    .with_details(json!({ "path": path }));
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
