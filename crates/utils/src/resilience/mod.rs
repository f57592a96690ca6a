//! Resilience patterns for talking to remote authorities and stores.
//!
//! ## Key Components
//!
//! - **`retry`**: bounded retry budgets with exponential backoff and jitter,
//!   used by compare-and-swap loops.
//! - **`limiting`**: a rolling-window rate limiter that callers await before
//!   issuing a remote request.

pub mod limiting;
pub mod retry;

pub use limiting::{RateLimitError, RateLimiter};
pub use retry::{RetryConfig, RetryOn};
