use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How long a caller keeps trying for a contended lock.
///
/// The delay doubles after every failed attempt, up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the first; 0 behaves like 1
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(4),
        }
    }

    /// Waits 0.5s, 1s, 2s, 4s between five attempts
    pub fn lock_wait() -> Self {
        Self::new(5, Duration::from_millis(500))
    }

    pub fn no_wait() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or runs out of attempts. The last error is returned.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&err) {
            return Err(err);
        }
        if attempt >= attempts {
            warn!("{} gave up after {} attempts: {}", operation_name, attempts, err);
            return Err(err);
        }

        let delay = config.backoff(attempt - 1);
        debug!(
            "{} attempt {}/{} failed ({}), waiting {:?}",
            operation_name, attempt, attempts, err, delay
        );
        sleep(delay).await;
        attempt += 1;
    }
}
