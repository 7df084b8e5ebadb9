//! How often and how patiently a failed connect is re-attempted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::millis;

/// Retry policy shared by every connect attempt a manager runs.
///
/// `max_attempts` counts *total* attempts, so `3` means one try plus two
/// retries. After the last failed attempt the peer's record is dropped as
/// `Failed` and only a later discovery sweep will try it again.
///
/// ```rust
/// use std::time::Duration;
/// use bitchat_peer::RetryPolicy;
///
/// let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(1));
/// assert_eq!(policy.delay_after(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_after(3), Duration::from_millis(400));
/// assert_eq!(policy.delay_after(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
    #[serde(default)]
    pub backoff: Backoff,
}

/// How the delay grows between consecutive retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Every retry waits `delay`.
    #[default]
    Fixed,
    /// The delay doubles after each failure, never exceeding `max_delay`.
    Exponential {
        #[serde(rename = "max_delay_ms", with = "millis")]
        max_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Exponential { max_delay },
        }
    }

    /// Returns `true` if another attempt may follow `attempts_made` failed
    /// ones.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// The pause after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let doublings = attempt.saturating_sub(1).min(31);
                self.delay.saturating_mul(1_u32 << doublings).min(max_delay)
            }
        }
    }

    /// Sleeps for [`delay_after`](Self::delay_after), returning `false`
    /// early if `stop` flips to `true` (or its sender goes away) in the
    /// meantime.
    pub async fn wait(&self, attempt: u32, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(self.delay_after(attempt)) => true,
            _ = stop.wait_for(|stopping| *stopping) => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_another_counts_total_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn test_delay_after_fixed_is_constant() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(250));

        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(4), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_after_exponential_doubles_then_caps() {
        let policy = RetryPolicy::exponential(
            10,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(50), Duration::from_secs(2));

        let json = serde_json::to_value(&policy).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "max_attempts": 4,
                "delay_ms": 50,
                "backoff": { "kind": "exponential", "max_delay_ms": 2000 }
            })
        );
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_serde_backoff_defaults_to_fixed() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":2,"delay_ms":10}"#).unwrap();

        assert_eq!(policy, RetryPolicy::fixed(2, Duration::from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_delay() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(3));
        let (_tx, mut rx) = watch::channel(false);
        let start = tokio::time::Instant::now();

        assert!(policy.wait(1, &mut rx).await);

        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_early_on_shutdown() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(60));
        let (tx, mut rx) = watch::channel(false);
        let start = tokio::time::Instant::now();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        });

        assert!(!policy.wait(1, &mut rx).await);
        assert!(start.elapsed() < Duration::from_secs(60));
        stopper.await.unwrap();
    }
}
