//! Capped exponential backoff as a plain value.
//!
//! A [`RetryPolicy`] describes the schedule; [`Backoff`] walks it for one
//! call and stops handing out delays once the elapsed-time budget or the
//! optional attempt cap is spent.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Wall-clock budget measured from the first attempt.
    pub max_elapsed: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Rate limits: start at one second, multiply by five, cap each wait at
    /// the fifteen minute window length.
    pub fn rate_limit(max_elapsed: Duration) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 5,
            max_delay: Duration::from_secs(900),
            max_elapsed,
            max_attempts: None,
        }
    }

    /// Server errors and transport failures: same curve, shorter ceiling.
    pub fn server_unavailable(max_elapsed: Duration) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 5,
            max_delay: Duration::from_secs(60),
            max_elapsed,
            max_attempts: None,
        }
    }

    /// Waiting for a freshly started store to accept connections.
    pub fn startup() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
            max_attempts: None,
        }
    }

    #[cfg(test)]
    pub fn test(max_elapsed: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            factor: 2,
            max_delay: Duration::from_millis(20),
            max_elapsed,
            max_attempts: None,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            started: Instant::now(),
            current: self.initial_delay,
            attempts: 0,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    started: Instant,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Delay before the next retry, or `None` when the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_at_least(Duration::ZERO)
    }

    /// Like [`next_delay`](Self::next_delay), but waits at least `hint`
    /// (a server-advertised reset time), still clipped to the budget.
    pub fn next_delay_at_least(&mut self, hint: Duration) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let remaining = self.remaining();
        if remaining.is_zero() {
            return None;
        }

        let delay = self
            .current
            .min(self.policy.max_delay)
            .max(hint)
            .min(remaining);

        self.attempts += 1;
        self.current = self
            .current
            .saturating_mul(self.policy.factor.max(1))
            .min(self.policy.max_delay);
        Some(delay)
    }

    pub fn remaining(&self) -> Duration {
        self.policy.max_elapsed.saturating_sub(self.started.elapsed())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Run `op` until it succeeds or `policy` gives up, returning the last error.
pub async fn retry<T, E, F, Fut>(what: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        what,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(what, attempts = backoff.attempts(), error = %e, "giving up");
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_by_factor_and_cap() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            factor: 5,
            max_delay: Duration::from_secs(900),
            max_elapsed: Duration::from_secs(100_000),
            max_attempts: None,
        };
        let mut backoff = policy.backoff();
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 5, 25, 125, 625, 900]);
    }

    #[test]
    fn attempt_cap_stops_backoff() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::test(Duration::from_secs(60))
        };
        let mut backoff = policy.backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut backoff = RetryPolicy::test(Duration::ZERO).backoff();
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn hint_raises_delay_but_not_past_budget() {
        let mut backoff = RetryPolicy::test(Duration::from_secs(2)).backoff();
        let delay = backoff
            .next_delay_at_least(Duration::from_secs(30))
            .unwrap();
        assert!(delay <= Duration::from_secs(2));
        assert!(delay > Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> =
            retry("flaky", &RetryPolicy::test(Duration::from_secs(5)), move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let started = std::time::Instant::now();
        let result: Result<(), String> =
            retry("down", &RetryPolicy::test(Duration::from_millis(50)), || async {
                Err("still down".to_string())
            })
            .await;
        assert_eq!(result, Err("still down".to_string()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
