//! Deterministic retry with a caller-supplied delay schedule.
//!
//! Every upstream call (recognition, translation, embedding) runs through a
//! [`RetryPolicy`]. Between attempt *i* and *i+1* the policy sleeps
//! `delays[min(i, delays.len() - 1)]`, so the last delay is reused once the
//! schedule runs out. There is no jitter: callers are already capped by an
//! [`crate::governor::AdmissionGovernor`], which keeps retries from stampeding.

use crate::error::RetryError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before attempt 2, 3, … The last entry repeats.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// Three attempts with 2 s / 4 s / 8 s waits.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    /// Parse a comma-separated list of whole seconds, e.g. `"2,4,8"`.
    pub fn parse_delays(s: &str) -> Result<Vec<Duration>, std::num::ParseIntError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u64>().map(Duration::from_secs))
            .collect()
    }

    /// Delay to wait after the failed attempt with 0-based index `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.delays.len() {
            0 => Duration::ZERO,
            n => self.delays[(attempt as usize).min(n - 1)],
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// `is_retryable` decides which errors earn another attempt; anything else
    /// is returned at once as [`RetryError::Permanent`]. `label` only shows up
    /// in log records.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            info!("{}: attempt {}/{}", label, attempt + 1, max_attempts);

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&err) {
                warn!("{}: attempt {} failed permanently: {}", label, attempt + 1, err);
                return Err(RetryError::Permanent(err));
            }

            warn!("{}: attempt {} failed: {}", label, attempt + 1, err);

            if attempt + 1 >= max_attempts {
                error!("{}: all {} attempts failed", label, max_attempts);
                return Err(RetryError::Exhausted {
                    attempts: max_attempts,
                    last: err,
                });
            }

            let delay = self.delay_after(attempt);
            info!("{}: retrying in {:?}", label, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn secs(v: &[u64]) -> Vec<Duration> {
        v.iter().copied().map(Duration::from_secs).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts_and_waits_schedule() {
        let policy = RetryPolicy::new(3, secs(&[2, 4, 8]));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run(
                "always-fails",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(BackendError::Transport("reset".into())) }
                },
                BackendError::is_retryable,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(6));
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, BackendError::Transport(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(
                "auth",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(BackendError::Auth("bad key".into())) }
                },
                BackendError::is_retryable,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent(BackendError::Auth(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt() {
        let policy = RetryPolicy::new(3, secs(&[2]));
        let calls = AtomicU32::new(0);

        let value = policy
            .run(
                "flaky",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(BackendError::from_status(503, "busy"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                BackendError::is_retryable,
            )
            .await
            .expect("second attempt succeeds");

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_delay_is_reused_when_schedule_runs_out() {
        let policy = RetryPolicy::new(5, secs(&[1, 2]));
        let start = Instant::now();

        let _: Result<(), _> = policy
            .run(
                "reuse",
                || async { Err(BackendError::Timeout { secs: 1 }) },
                BackendError::is_retryable,
            )
            .await;

        // 1 + 2 + 2 + 2
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[test]
    fn delay_after_clamps_to_last_entry() {
        let policy = RetryPolicy::new(10, secs(&[2, 4, 8]));
        assert_eq!(policy.delay_after(0), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(8));
        assert_eq!(policy.delay_after(7), Duration::from_secs(8));
        assert_eq!(RetryPolicy::no_retry().delay_after(3), Duration::ZERO);
    }

    #[test]
    fn parse_delays_from_setting_string() {
        assert_eq!(RetryPolicy::parse_delays("2,4,8").unwrap(), secs(&[2, 4, 8]));
        assert_eq!(RetryPolicy::parse_delays(" 1 , 3 ").unwrap(), secs(&[1, 3]));
        assert!(RetryPolicy::parse_delays("a,b").is_err());
    }
}
