//! Backoff delay calculation for retries

use std::time::Duration;

use rand::Rng;

/// Exponential backoff calculator
///
/// Delay for retry `n` (1-indexed) is `base_delay * 2^n`, capped at
/// `max_delay`. Jitter, when enabled, spreads delays by up to ±20% so
/// simultaneous failures do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter,
        }
    }

    /// Delay before the given retry attempt re-enters the queue
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2f64.powi(attempt.min(31) as i32);
        let raw = Duration::from_nanos((self.base_delay.as_nanos() as f64 * multiplier) as u64);
        let capped = raw.min(self.max_delay);

        if self.jitter {
            self.add_jitter(capped)
        } else {
            capped
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(0.8..1.2);
        Duration::from_nanos((delay.as_nanos() as f64 * jitter_factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let calc = BackoffCalculator::new(Duration::from_secs(1), Duration::from_secs(10), false);

        assert_eq!(calc.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(calc.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(calc.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn caps_at_max_delay() {
        let calc = BackoffCalculator::new(Duration::from_secs(1), Duration::from_secs(10), false);

        assert_eq!(calc.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(calc.delay_for_attempt(30), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let calc = BackoffCalculator::new(Duration::from_secs(1), Duration::from_secs(60), true);

        for _ in 0..20 {
            let delay = calc.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(1600));
            assert!(delay <= Duration::from_millis(2400));
        }
    }
}
