//! Admission control for upstream APIs: a sliding-window rate limit combined
//! with a concurrency cap.
//!
//! Hosted LLM APIs publish requests per minute and a ceiling on parallel
//! requests per key. [`AdmissionGovernor::acquire`] enforces the rate
//! window first and then takes a concurrency permit. The returned
//! [`AdmissionPermit`] releases the slot when dropped, including on the error
//! path.
//!
//! Both suspension points are tokio futures. Waiters are not served in
//! arrival order; each one re-checks the window when it wakes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate and concurrency contract for one upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GovernorLimits {
    /// Admissions allowed per `window`.
    pub max_requests: u32,
    /// Length of the trailing window.
    pub window: Duration,
    /// Operations allowed in flight at once.
    pub max_concurrent: usize,
}

impl GovernorLimits {
    pub fn per_minute(max_requests: u32, max_concurrent: usize) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
            max_concurrent,
        }
    }
}

/// The governor was closed; no further admissions are granted.
#[derive(Debug, Clone, Error)]
#[error("admission governor '{0}' is closed")]
pub struct AdmissionClosed(pub String);

/// Proof of admission. Holding it occupies one concurrency slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Combined rate + concurrency limiter guarding one upstream API.
#[derive(Debug)]
pub struct AdmissionGovernor {
    name: String,
    limits: GovernorLimits,
    admissions: Mutex<VecDeque<Instant>>,
    permits: Arc<Semaphore>,
}

impl AdmissionGovernor {
    pub fn new(name: impl Into<String>, limits: GovernorLimits) -> Self {
        let limits = GovernorLimits {
            max_requests: limits.max_requests.max(1),
            window: limits.window,
            max_concurrent: limits.max_concurrent.max(1),
        };
        Self {
            name: name.into(),
            admissions: Mutex::new(VecDeque::with_capacity(limits.max_requests as usize)),
            permits: Arc::new(Semaphore::new(limits.max_concurrent)),
            limits,
        }
    }

    pub fn limits(&self) -> GovernorLimits {
        self.limits
    }

    /// Operations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.limits
            .max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    /// Wait for a rate slot, then for a concurrency slot.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionClosed> {
        self.wait_for_rate_slot().await;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionClosed(self.name.clone()))?;
        debug!("{}: admitted ({} in flight)", self.name, self.in_flight());
        Ok(AdmissionPermit { _permit: permit })
    }

    async fn wait_for_rate_slot(&self) {
        loop {
            let deadline = {
                let mut admissions = lock(&self.admissions);
                let now = Instant::now();
                while let Some(&oldest) = admissions.front() {
                    if now.duration_since(oldest) >= self.limits.window {
                        admissions.pop_front();
                    } else {
                        break;
                    }
                }

                if admissions.len() < self.limits.max_requests as usize {
                    admissions.push_back(now);
                    return;
                }

                admissions.front().map(|&oldest| oldest + self.limits.window)
            };

            if let Some(deadline) = deadline {
                warn!(
                    "{}: rate limit of {} requests / {:?} reached, waiting {:?}",
                    self.name,
                    self.limits.max_requests,
                    self.limits.window,
                    deadline.saturating_duration_since(Instant::now())
                );
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}

/// One governor per upstream API kind; their rate contracts differ.
#[derive(Debug, Clone)]
pub struct Governors {
    pub recognition: Arc<AdmissionGovernor>,
    pub translation: Arc<AdmissionGovernor>,
    pub embedding: Arc<AdmissionGovernor>,
}

impl Governors {
    pub fn new(
        recognition: GovernorLimits,
        translation: GovernorLimits,
        embedding: GovernorLimits,
    ) -> Self {
        Self {
            recognition: Arc::new(AdmissionGovernor::new("recognition", recognition)),
            translation: Arc::new(AdmissionGovernor::new("translation", translation)),
            embedding: Arc::new(AdmissionGovernor::new("embedding", embedding)),
        }
    }

    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        Self::new(
            config.recognition_limits,
            config.translation_limits,
            config.embedding_limits,
        )
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let governor = Arc::new(AdmissionGovernor::new(
            "test",
            GovernorLimits {
                max_requests: 1000,
                window: Duration::from_secs(1),
                max_concurrent: 3,
            },
        ));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let governor = Arc::clone(&governor);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = governor.acquire().await.expect("open governor");
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= 3, "{now} operations in flight");
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.expect("task panicked");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_window_delays_excess_admissions() {
        let governor = AdmissionGovernor::new(
            "test",
            GovernorLimits {
                max_requests: 2,
                window: Duration::from_secs(10),
                max_concurrent: 10,
            },
        );
        let start = Instant::now();

        drop(governor.acquire().await.unwrap());
        drop(governor.acquire().await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));

        drop(governor.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn permit_is_released_on_error_path() {
        let governor = AdmissionGovernor::new("test", GovernorLimits::per_minute(100, 1));

        let failing = async {
            let _permit = governor.acquire().await?;
            Err::<(), _>(AdmissionClosed("boom".into()))
        };
        assert!(failing.await.is_err());
        assert_eq!(governor.in_flight(), 0);

        let _again = governor.acquire().await.expect("slot freed");
        assert_eq!(governor.in_flight(), 1);
    }

    #[test]
    fn zero_limits_are_raised_to_one() {
        let governor = AdmissionGovernor::new(
            "test",
            GovernorLimits {
                max_requests: 0,
                window: Duration::from_secs(1),
                max_concurrent: 0,
            },
        );
        assert_eq!(governor.limits().max_requests, 1);
        assert_eq!(governor.limits().max_concurrent, 1);
    }
}
