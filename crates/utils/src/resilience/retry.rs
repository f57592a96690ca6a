//! Retry budgets and exponential backoff for optimistic-concurrency loops.

use caplife_core::{Error, ErrorKind};
use rand::Rng;
use std::time::Duration;

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: usize = 10;

/// Default base delay for exponential backoff (10ms)
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);

/// Default maximum delay for exponential backoff (1s)
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Default jitter factor (0.1 = 10% randomization)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Which errors a retry loop may retry
#[derive(Clone)]
pub enum RetryOn {
    /// Retry all errors
    All,
    /// Retry network and storage hiccups
    Transient,
    /// Retry lost conditional writes (duplicate on create, stale sequence)
    WriteConflict,
    /// Custom predicate for retry decisions
    Custom(fn(&Error) -> bool),
}

impl std::fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryOn::All => write!(f, "All"),
            RetryOn::Transient => write!(f, "Transient"),
            RetryOn::WriteConflict => write!(f, "WriteConflict"),
            RetryOn::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Jitter factor for randomization (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Whether to retry on specific error types
    pub retry_on: RetryOn,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            retry_on: RetryOn::Transient,
        }
    }
}

impl RetryConfig {
    /// Retry config for compare-and-swap loops against a backing store
    pub fn for_write_conflicts(max_retries: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            retry_on: RetryOn::WriteConflict,
        }
    }

    /// Check if an error should be retried
    pub fn should_retry(&self, error: &Error) -> bool {
        match &self.retry_on {
            RetryOn::All => true,
            RetryOn::Transient => error.is_transient(),
            RetryOn::WriteConflict => {
                matches!(error.kind(), ErrorKind::Duplicate | ErrorKind::InvalidState)
            }
            RetryOn::Custom(predicate) => predicate(error),
        }
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).min(31);
        let exponential_delay = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        let capped_delay = exponential_delay.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay.as_millis() as f64 * self.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-1.0..=1.0) * jitter_range;
            let final_millis = (capped_delay.as_millis() as f64 + jitter).max(0.0) as u64;
            Duration::from_millis(final_millis)
        } else {
            capped_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_conflicts_only() {
        let config = RetryConfig::for_write_conflicts(
            3,
            Duration::from_millis(1),
            Duration::from_millis(8),
        );
        assert!(config.should_retry(&Error::duplicate("doc")));
        assert!(config.should_retry(&Error::invalid_state("doc", "stale")));
        assert!(!config.should_retry(&Error::aborted("doc", "exists")));
        assert!(!config.should_retry(&Error::network("db", "down")));
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(500));
        assert_eq!(config.calculate_delay(500), Duration::from_millis(500));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..20 {
            let delay = config.calculate_delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(600));
        }
    }
}
