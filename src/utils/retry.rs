// src/utils/retry.rs
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::TraderError;

/// Bounded retry with exponential backoff, parameterized per call site by
/// a retryable-error predicate. One policy instance serves every caller
/// that needs retries; the backoff schedule is `base_delay * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (0-based). Strictly increasing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is exhausted. Non-retryable errors are returned
    /// immediately without sleeping.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, TraderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TraderError>>,
        P: Fn(&TraderError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if retryable(&err) && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "retryable error (attempt {}/{}), backing off {:?}: {}",
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
