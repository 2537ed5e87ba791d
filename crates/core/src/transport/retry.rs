//! Bounded retry with a fixed sleep between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::TransportError;

/// How many times to try a transfer and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. `attempt` receives the 1-based
    /// attempt number. The returned error records how many attempts ran.
    pub async fn run<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut n = 1;
        loop {
            debug!(url, attempt = n, max_attempts = self.max_attempts, "Transfer attempt");
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    warn!(url, attempt = n, kind = %e.kind, "Transfer failed, not retrying: {}", e.message);
                    return Err(e.with_attempts(n));
                }
                Err(e) if n >= self.max_attempts => {
                    warn!(url, attempts = n, kind = %e.kind, "Transfer failed, attempts exhausted: {}", e.message);
                    return Err(e.with_attempts(n));
                }
                Err(e) => {
                    warn!(
                        url,
                        attempt = n,
                        max_attempts = self.max_attempts,
                        kind = %e.kind,
                        "Transfer attempt failed: {}. Retrying in {:?}",
                        e.message,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    n += 1;
                }
            }
        }
    }
}
