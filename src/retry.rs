use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy for tests, that doesn't wait between attempts.
    pub fn immediate(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let micros = self.initial_delay.as_micros() as f64 * self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_micros() as f64;
        Duration::from_micros(micros.min(max).round() as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Calls `operation` until it succeeds or attempts are exhausted.
/// Returns the last error.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut failures = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                failures += 1;
                if failures >= policy.attempts() {
                    log::warn!("{what} failed {failures} time(s). Giving up. {e}");
                    return Err(e);
                }

                let delay = policy.delay(failures);
                log::warn!("{what} failed (attempt {failures}). Retrying in {delay:?}. {e}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_grows_until_limit() {
        let policy = RetryPolicy {
            attempts: 10,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: RetryPolicy =
            serde_yaml::from_str("{ attempts: 5, initial_delay: 50ms, max_delay: 2s }").unwrap();

        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Cell::new(0);
        let result = retry(&RetryPolicy::immediate(3), "Commit", || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                match attempt {
                    1 | 2 => anyhow::bail!("Connection reset"),
                    _ => Ok(attempt),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = Cell::new(0);
        let result: anyhow::Result<()> = retry(&RetryPolicy::immediate(2), "Commit", || {
            calls.set(calls.get() + 1);
            async { anyhow::bail!("Connection reset") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }
}
