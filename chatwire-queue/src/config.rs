//! Queue configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`RequestQueue`](crate::RequestQueue)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of tasks in flight at once
    pub max_concurrent: usize,

    /// Maximum pending items (priority buckets plus batch buffer) before
    /// admission is rejected with an overflow error
    pub max_queue_size: usize,

    /// Batch buffer size that triggers an immediate flush
    pub batch_size: usize,

    /// Delay after the first buffered item before the batch flushes anyway
    #[serde(with = "humantime_serde")]
    pub batch_delay: Duration,

    /// Base delay for retry backoff
    #[serde(with = "humantime_serde")]
    pub base_retry_delay: Duration,

    /// Ceiling on the retry backoff delay
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,

    /// Timeout applied to tasks that do not specify their own
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Retry budget applied to tasks that do not specify their own
    pub default_max_retries: u32,

    /// Whether to add jitter to retry delays
    #[serde(default)]
    pub jitter: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_queue_size: 100,
            batch_size: 5,
            batch_delay: Duration::from_millis(100),
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
            default_max_retries: 2,
            jitter: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_limits() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 6);
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.default_max_retries, 2);
        assert_eq!(config.base_retry_delay, Duration::from_secs(1));
        assert_eq!(config.max_retry_delay, Duration::from_secs(10));
    }

    #[test]
    fn config_roundtrips_through_serde() {
        let config = QueueConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_concurrent, config.max_concurrent);
        assert_eq!(parsed.batch_delay, config.batch_delay);
    }
}
