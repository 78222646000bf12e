//! Autonomous stop decision for the monitored service.
//!
//! The kill switch gates a protective stop behind a severity threshold, a
//! startup cooldown, and an hourly rate limit. The rate window is fixed,
//! not sliding: the counter resets once the stored window start is more
//! than an hour old, so a burst straddling a window boundary can exceed
//! the hourly cap. That limitation is kept deliberately rather than
//! papered over with different window semantics.

use chrono::{DateTime, Duration, Utc};

use vigil_core::config::KillSwitchConfig;
use vigil_core::event::Severity;

/// Outcome of evaluating one event against the kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillDecision {
    /// No threshold configured; the switch never acts.
    Disabled,
    /// Still inside the startup grace period.
    Cooldown,
    /// Severity below the configured threshold.
    BelowThreshold,
    /// Hourly cap reached; the stop was suppressed.
    RateLimited,
    /// Stop the monitored service.
    Kill,
}

/// Kill-switch state. Only the event sink touches this, one event at a
/// time, so the check-then-increment on the counter cannot race.
#[derive(Debug)]
pub struct KillSwitch {
    threshold: Option<Severity>,
    max_per_hour: u32,
    kill_count: u32,
    window_start: DateTime<Utc>,
    started_at: DateTime<Utc>,
    cooldown: Duration,
    restart_delay: Option<std::time::Duration>,
}

impl KillSwitch {
    pub fn new(config: &KillSwitchConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            threshold: config.threshold,
            max_per_hour: config.max_per_hour,
            kill_count: 0,
            window_start: started_at,
            started_at,
            cooldown: Duration::seconds(config.startup_cooldown_secs as i64),
            restart_delay: config
                .restart_delay_secs
                .map(std::time::Duration::from_secs),
        }
    }

    /// Delay before the single deferred restart, when configured.
    pub fn restart_delay(&self) -> Option<std::time::Duration> {
        self.restart_delay
    }

    /// Evaluate one event. The counter only moves when the decision is
    /// [`KillDecision::Kill`].
    pub fn decide(&mut self, severity: Severity, now: DateTime<Utc>) -> KillDecision {
        let Some(threshold) = self.threshold else {
            return KillDecision::Disabled;
        };

        if now - self.started_at < self.cooldown {
            return KillDecision::Cooldown;
        }

        if severity < threshold {
            return KillDecision::BelowThreshold;
        }

        if now - self.window_start > Duration::hours(1) {
            self.kill_count = 0;
            self.window_start = now;
        }

        if self.kill_count >= self.max_per_hour {
            return KillDecision::RateLimited;
        }

        self.kill_count += 1;
        KillDecision::Kill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        threshold: Option<Severity>,
        max_per_hour: u32,
        cooldown_secs: u64,
    ) -> KillSwitchConfig {
        KillSwitchConfig {
            threshold,
            max_per_hour,
            startup_cooldown_secs: cooldown_secs,
            restart_delay_secs: None,
        }
    }

    #[test]
    fn disabled_without_threshold() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(None, 1, 0), start);
        assert_eq!(ks.decide(Severity::Critical, start), KillDecision::Disabled);
    }

    #[test]
    fn critical_threshold_fires_once_then_rate_limits() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::Critical), 1, 0), start);

        assert_eq!(ks.decide(Severity::Critical, start), KillDecision::Kill);
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::minutes(10)),
            KillDecision::RateLimited
        );
    }

    #[test]
    fn high_never_fires_at_critical_threshold() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::Critical), 1, 0), start);
        assert_eq!(
            ks.decide(Severity::High, start),
            KillDecision::BelowThreshold
        );
    }

    #[test]
    fn high_threshold_fires_on_high_and_critical() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::High), 5, 0), start);
        assert_eq!(ks.decide(Severity::High, start), KillDecision::Kill);
        assert_eq!(ks.decide(Severity::Critical, start), KillDecision::Kill);
        assert_eq!(
            ks.decide(Severity::Warning, start),
            KillDecision::BelowThreshold
        );
    }

    #[test]
    fn startup_cooldown_suppresses_everything() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::High), 5, 60), start);

        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::seconds(30)),
            KillDecision::Cooldown
        );
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::seconds(59)),
            KillDecision::Cooldown
        );
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::seconds(61)),
            KillDecision::Kill
        );
    }

    #[test]
    fn window_resets_after_an_hour() {
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::Critical), 1, 0), start);

        assert_eq!(ks.decide(Severity::Critical, start), KillDecision::Kill);
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::minutes(30)),
            KillDecision::RateLimited
        );
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::minutes(61)),
            KillDecision::Kill
        );
    }

    #[test]
    fn fixed_window_allows_boundary_straddle() {
        // Two kills closer together than an hour, across a window reset.
        let start = Utc::now();
        let mut ks = KillSwitch::new(&config(Some(Severity::Critical), 1, 0), start);

        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::minutes(55)),
            KillDecision::Kill
        );
        assert_eq!(
            ks.decide(Severity::Critical, start + Duration::minutes(62)),
            KillDecision::Kill
        );
    }
}
