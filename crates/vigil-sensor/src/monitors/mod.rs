//! Long-running monitors feeding the event sink.
//!
//! Each monitor is an independent failure domain. A missing source logs one
//! diagnostic line and the monitor contributes no events for its lifetime;
//! the remaining monitors keep running.

pub mod audit_log;
pub mod config_dir;
pub mod transcript;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Monitors poll it at sub-second granularity and
/// exit promptly once cleared.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
