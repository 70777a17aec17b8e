use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{trace, warn};

use crate::config::RetrySection;

use super::error::{BrowserError, BrowserResult};

/// Re-evaluates `condition` every `poll_delay` until it yields a value or
/// `timeout` has elapsed. Errors from the condition propagate immediately.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    mut condition: F,
    timeout: Duration,
    poll_delay: Duration,
) -> BrowserResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<Option<T>>>,
{
    let start = Instant::now();
    let mut checks = 0usize;
    while start.elapsed() < timeout {
        checks += 1;
        if let Some(value) = condition().await? {
            trace!(what, checks, "condition satisfied");
            return Ok(value);
        }
        sleep(poll_delay).await;
    }
    Err(BrowserError::Timeout {
        what: what.to_string(),
        elapsed: start.elapsed(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(RetrySection::default())
    }
}

impl BackoffPolicy {
    pub fn new(config: RetrySection) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor.max(1.0),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound of the wait before retry number `attempt + 1`.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_nanos() as f64 * self.factor.powi(attempt as i32);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        self.ceiling_for_attempt(attempt).mul_f64(jitter)
    }

    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation(attempt as usize).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt as usize + 1,
                    });
                }
                Err(error) => {
                    if attempt >= self.max_retries {
                        return Err(error);
                    }
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "operation failed, retrying"
                    );
                    attempt += 1;
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
