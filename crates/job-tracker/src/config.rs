//! Tracker timing configuration.

use std::time::Duration;

const MIN_POLL: Duration = Duration::from_secs(1);
const MAX_POLL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Status query cadence while a job is queued or processing.
    pub poll_interval: Duration,
    /// How often the on-screen elapsed timer is re-evaluated between polls.
    pub tick_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2500),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl TrackerConfig {
    /// Poll interval clamped to 1..=10 seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.clamp(MIN_POLL, MAX_POLL);
        self
    }

    /// Defaults, with `JOB_TRACKER_POLL_MS` overriding the poll interval.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var("JOB_TRACKER_POLL_MS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => config.with_poll_interval(Duration::from_millis(ms)),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "ignoring invalid JOB_TRACKER_POLL_MS");
                    config
                }
            },
            Err(_) => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_clamped() {
        let c = TrackerConfig::default().with_poll_interval(Duration::from_millis(10));
        assert_eq!(c.poll_interval, Duration::from_secs(1));
        let c = TrackerConfig::default().with_poll_interval(Duration::from_secs(60));
        assert_eq!(c.poll_interval, Duration::from_secs(10));
        let c = TrackerConfig::default().with_poll_interval(Duration::from_secs(3));
        assert_eq!(c.poll_interval, Duration::from_secs(3));
    }
}
