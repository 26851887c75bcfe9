//! Queue statistics

use serde::{Deserialize, Serialize};

/// Monotonic counters and smoothed running averages for a queue
///
/// The averages use a recency-biased smoothing step rather than a true
/// cumulative mean: each new sample is averaged with the current value, so
/// recent samples dominate. Consumers treating these as exact means will be
/// surprised; they are trend indicators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total admissions accepted
    pub queued: u64,
    /// Tasks settled successfully
    pub processed: u64,
    /// Tasks settled with a terminal error
    pub failed: u64,
    /// Admissions rejected for capacity
    pub overflowed: u64,
    /// Smoothed time from admission to dispatch, in milliseconds
    pub avg_wait_ms: f64,
    /// Smoothed time from dispatch to settlement, in milliseconds
    pub avg_processing_ms: f64,
}

impl QueueStats {
    pub(crate) fn record_wait(&mut self, wait_ms: f64) {
        self.avg_wait_ms = smooth(self.avg_wait_ms, wait_ms);
    }

    pub(crate) fn record_processing(&mut self, processing_ms: f64) {
        self.avg_processing_ms = smooth(self.avg_processing_ms, processing_ms);
    }
}

/// Recency-biased running average: the current value and the new sample are
/// weighted equally, halving the influence of each older sample per step.
fn smooth(current: f64, sample: f64) -> f64 {
    if current == 0.0 {
        sample
    } else {
        (current + sample) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_taken_as_is() {
        let mut stats = QueueStats::default();
        stats.record_wait(40.0);
        assert_eq!(stats.avg_wait_ms, 40.0);
    }

    #[test]
    fn smoothing_biases_toward_recent_samples() {
        let mut stats = QueueStats::default();
        stats.record_processing(100.0);
        stats.record_processing(200.0);
        assert_eq!(stats.avg_processing_ms, 150.0);

        // A third sample outweighs the history a true mean would give it
        stats.record_processing(600.0);
        assert_eq!(stats.avg_processing_ms, 375.0);
    }
}
