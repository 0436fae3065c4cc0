//! Bounded retry with exponential backoff. No jitter is added: delays are exactly
//! `initial_delay * backoff_factor^attempt`, capped at `max_delay`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use fieldcache_config as config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        max_attempts: config::DEFAULT_RETRY_ATTEMPTS,
        initial_delay: config::DEFAULT_RETRY_INITIAL_DELAY,
        max_delay: config::DEFAULT_RETRY_MAX_DELAY,
        backoff_factor: config::RETRY_BACKOFF_FACTOR,
    };

    pub const AGGRESSIVE: Self = Self {
        max_attempts: config::AGGRESSIVE_RETRY_ATTEMPTS,
        initial_delay: config::AGGRESSIVE_RETRY_INITIAL_DELAY,
        max_delay: config::AGGRESSIVE_RETRY_MAX_DELAY,
        backoff_factor: config::RETRY_BACKOFF_FACTOR,
    };

    pub const CONSERVATIVE: Self = Self {
        max_attempts: config::CONSERVATIVE_RETRY_ATTEMPTS,
        initial_delay: config::CONSERVATIVE_RETRY_INITIAL_DELAY,
        max_delay: config::CONSERVATIVE_RETRY_MAX_DELAY,
        backoff_factor: config::RETRY_BACKOFF_FACTOR,
    };

    /// Delay after the 0-based `attempt` fails.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Runs `operation` up to `max_attempts` times. `on_retry` sees every failure that
    /// will be retried; the last failure is returned without a further delay.
    pub async fn execute<T, E, Op, Fut>(
        &self,
        operation: Op,
        on_retry: impl FnMut(u32, &E),
    ) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_if(operation, |_| true, on_retry).await
    }

    /// Like [`execute`](Self::execute), but failures rejected by `is_retryable` are returned
    /// immediately.
    pub async fn execute_if<T, E, Op, Fut, P, R>(
        &self,
        mut operation: Op,
        mut is_retryable: P,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        R: FnMut(u32, &E),
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt + 1 >= attempts || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.calculate_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying: {e}"
                    );
                    on_retry(attempt, &e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
