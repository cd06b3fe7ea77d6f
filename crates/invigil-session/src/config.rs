//! Session tuning parameters.

use std::time::Duration;

use chrono::TimeDelta;

use invigil_core::lease::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LIVENESS_INTERVAL_MS, heartbeat_timeout_ms,
};
use invigil_core::sync::{
    DEFAULT_DRIFT_THRESHOLD_MS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_SYNC_CADENCE_MS,
    DEFAULT_SYNC_CHECK_INTERVAL_MS,
};

/// Tuning knobs for one tab session.
///
/// The defaults are starting points to validate empirically under real
/// network conditions, not load-bearing constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often a master rewrites its lease heartbeat.
    pub heartbeat_interval: Duration,
    /// Age past which a lease counts as dead and claimable.
    pub heartbeat_timeout: Duration,
    /// How often a blocked tab re-examines the stored lease.
    pub liveness_interval: Duration,
    /// Cadence of the local "is a server sync due" check.
    pub sync_check_interval: Duration,
    /// Minimum spacing between server syncs.
    pub sync_cadence: Duration,
    /// Debounce applied to visibility-regained nudges.
    pub settle_delay: Duration,
    /// Drift below this is jitter and left uncorrected.
    pub drift_threshold: Duration,
    /// Cadence of the UI-facing countdown publication.
    pub countdown_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(heartbeat_timeout_ms(
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )),
            liveness_interval: Duration::from_millis(DEFAULT_LIVENESS_INTERVAL_MS),
            sync_check_interval: Duration::from_millis(DEFAULT_SYNC_CHECK_INTERVAL_MS),
            sync_cadence: Duration::from_millis(DEFAULT_SYNC_CADENCE_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            drift_threshold: Duration::from_millis(DEFAULT_DRIFT_THRESHOLD_MS),
            countdown_interval: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    /// Derive the timeout from a heartbeat interval (3 missed heartbeats).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = interval * 3;
        self
    }

    pub(crate) fn heartbeat_timeout_delta(&self) -> TimeDelta {
        to_delta(self.heartbeat_timeout)
    }

    pub(crate) fn sync_cadence_delta(&self) -> TimeDelta {
        to_delta(self.sync_cadence)
    }

    pub(crate) fn drift_threshold_ms(&self) -> i64 {
        i64::try_from(self.drift_threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(6));
        assert_eq!(config.liveness_interval, Duration::from_secs(2));
        assert_eq!(config.sync_check_interval, Duration::from_secs(5));
        assert_eq!(config.sync_cadence, Duration::from_secs(30));
        assert_eq!(config.settle_delay, Duration::from_secs(1));
        assert_eq!(config.drift_threshold, Duration::from_secs(15));
        assert_eq!(config.countdown_interval, Duration::from_secs(1));
    }

    #[test]
    fn with_heartbeat_interval_rescales_timeout() {
        let config =
            SessionConfig::default().with_heartbeat_interval(Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(1_500));
    }

    #[test]
    fn drift_threshold_in_millis() {
        let config = SessionConfig::default();
        assert_eq!(config.drift_threshold_ms(), 15_000);
    }
}
