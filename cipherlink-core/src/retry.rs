//! Retry with exponential backoff and jitter for establishing the byte link
//!
//! Only the transport setup is retried this way. Once connected, the handshake state
//! machine does its own timeout-driven retries.

use crate::config::LinkConfig;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Ceiling on any single delay, before jitter
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Add up to a quarter of the delay at random
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Dial policy for a link configuration
    pub fn for_link(config: &LinkConfig) -> Self {
        Self {
            max_attempts: config.connect_retries.max(1),
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out
    pub async fn execute<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(what, attempt, "succeeded after retrying");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let mut backoff = self.backoff_after(attempt);
                    if self.jitter {
                        backoff = add_jitter(backoff);
                    }
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        ?backoff,
                        "attempt failed, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!(what, attempt, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn add_jitter(duration: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=duration.as_millis() / 4);
    duration + Duration::from_millis(jitter_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused() -> Error {
        Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_connected() {
        let policy = RetryPolicy::default();
        let attempts = &AtomicU32::new(0);

        let result = policy
            .execute("dial", || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let attempts = &AtomicU32::new(0);

        let result = policy
            .execute("dial", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let attempts = &AtomicU32::new(0);

        let result = RetryPolicy::default()
            .execute("dial", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Config("bad address".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_after(20), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = add_jitter(Duration::from_millis(400));
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_policy_for_link() {
        let config = LinkConfig {
            connect_retries: 3,
            ..LinkConfig::default()
        };
        assert_eq!(RetryPolicy::for_link(&config).max_attempts, 3);
    }
}
