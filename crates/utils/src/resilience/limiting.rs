//! Rolling-window rate limiting
//!
//! Caps how many operations may start within any window of the configured
//! length. Callers either wait for capacity with [`RateLimiter::acquire`] or
//! fail fast with [`RateLimiter::try_acquire`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Error type for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitError {
    pub message: String,
    /// How long until a slot frees up
    pub retry_after: Duration,
}

/// Rate limiter admitting at most `limit` operations per rolling `window`
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    /// Start times of admitted operations still inside the window
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter; a zero limit is treated as one
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// At most `limit` operations per second
    pub fn per_second(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Admit one operation now or report how long to wait
    pub fn try_acquire(&self) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();
        self.expire_old(&mut admitted, now);

        if admitted.len() < self.limit {
            admitted.push_back(now);
            return Ok(());
        }

        let retry_after = admitted
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        Err(RateLimitError {
            message: format!(
                "rate limit of {} per {:?} exceeded",
                self.limit, self.window
            ),
            retry_after,
        })
    }

    /// Wait until an operation may start
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(limited) => {
                    tracing::trace!(retry_after = ?limited.retry_after, "rate limited");
                    tokio::time::sleep(limited.retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Operations admitted within the current window
    pub fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.expire_old(&mut admitted, Instant::now());
        admitted.len()
    }

    fn expire_old(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
