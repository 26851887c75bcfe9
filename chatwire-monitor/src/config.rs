//! Monitor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by the health and proxy monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between probe cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe timeout; a probe exceeding this counts as a failure
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// A successful probe at or above this response time classifies as slow
    #[serde(with = "humantime_serde")]
    pub slow_threshold: Duration,

    /// Consecutive failed probes before the connection is marked disconnected
    pub max_consecutive_failures: u32,

    /// Rolling response-time history length
    pub history_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            slow_threshold: Duration::from_secs(5),
            max_consecutive_failures: 3,
            history_size: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.max_consecutive_failures, 3);
    }
}
