//! # vigil-sensor
//!
//! The continuous security watcher: three concurrent monitors (audit-log
//! tail, configuration-directory watch, transcript watch) feeding one
//! serialized event sink that prints, persists, and evaluates the kill
//! switch.
//!
//! Monitors are independent failure domains. A missing source degrades that
//! monitor to a no-op; it never takes the process down.

pub mod kill_switch;
pub mod monitors;
pub mod service;
pub mod sink;
pub mod watcher;

pub use kill_switch::{KillDecision, KillSwitch};
pub use service::{resolve_service_uid, ServiceControl, SystemdControl};
pub use watcher::{Watcher, WatcherState};
