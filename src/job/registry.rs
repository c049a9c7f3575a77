//! Per-job control signals for runs active in this process.
//!
//! [`ControlRegistry`] is an explicit object: the orchestrator owns an
//! `Arc<ControlRegistry>` and every control entry point goes through it. An
//! entry exists only while a run is live; the [`ControlGuard`] returned by
//! [`ControlRegistry::register`] removes it when the run ends, including when
//! the run task panics or is aborted.
//!
//! Each [`JobControl`] wraps a `tokio::sync::watch` channel. Writers update
//! the flags with `send_modify`, which serialises concurrent `pause` / `stop`
//! calls against the orchestrator's reads, and a paused run waits on
//! `changed()` so a resume or stop wakes it at once instead of at the next
//! poll tick.

use super::JobId;
use crate::error::DocTransError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Transient pause / stop flags of one running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub paused: bool,
    pub stopped: bool,
}

/// Control signal of one live run.
#[derive(Debug)]
pub struct JobControl {
    state: watch::Sender<ControlState>,
}

impl JobControl {
    fn new() -> Self {
        let (state, _) = watch::channel(ControlState::default());
        Self { state }
    }

    pub fn pause(&self) {
        self.state.send_modify(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.state.send_modify(|s| s.paused = false);
    }

    /// Request a stop. Clears `paused` so a waiting run observes it.
    pub fn stop(&self) {
        self.state.send_modify(|s| {
            s.stopped = true;
            s.paused = false;
        });
    }

    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    /// Suspend while the job is paused. Returns the state that ended the wait:
    /// either `paused == false` or `stopped == true`.
    ///
    /// Wakes on every flag change and re-checks at least every `poll`.
    pub async fn wait_while_paused(&self, poll: Duration) -> ControlState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.stopped || !state.paused {
                return state;
            }
            // Timeout is the periodic re-check; an error means no sender,
            // which cannot happen while `self` is alive.
            let _ = tokio::time::timeout(poll, rx.changed()).await;
        }
    }
}

/// Process-wide map of live job controls.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    entries: Mutex<HashMap<JobId, Arc<JobControl>>>,
}

impl ControlRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the control entry for a run that is about to start.
    pub fn register(self: &Arc<Self>, id: JobId) -> Result<ControlGuard, DocTransError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(DocTransError::AlreadyRunning { id });
        }
        let control = Arc::new(JobControl::new());
        entries.insert(id, Arc::clone(&control));
        Ok(ControlGuard {
            id,
            control,
            registry: Arc::clone(self),
        })
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobControl>> {
        self.lock().get(&id).cloned()
    }

    pub fn is_live(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of live runs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live run.
    pub fn live_jobs(&self) -> Vec<JobId> {
        self.lock().keys().copied().collect()
    }

    fn remove(&self, id: JobId, control: &Arc<JobControl>) {
        let mut entries = self.lock();
        // Only drop the entry this guard created.
        if entries.get(&id).is_some_and(|c| Arc::ptr_eq(c, control)) {
            entries.remove(&id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobControl>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a registry entry alive for the duration of one run.
#[derive(Debug)]
pub struct ControlGuard {
    id: JobId,
    control: Arc<JobControl>,
    registry: Arc<ControlRegistry>,
}

impl ControlGuard {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn control(&self) -> &JobControl {
        &self.control
    }
}

impl Drop for ControlGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id, &self.control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn entry_lives_as_long_as_the_guard() {
        let registry = ControlRegistry::new();
        let id = JobId::new();
        {
            let _guard = registry.register(id).unwrap();
            assert!(registry.is_live(id));
            assert!(matches!(
                registry.register(id),
                Err(DocTransError::AlreadyRunning { .. })
            ));
        }
        assert!(!registry.is_live(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_clears_pause() {
        let registry = ControlRegistry::new();
        let guard = registry.register(JobId::new()).unwrap();
        let control = registry.get(guard.id()).unwrap();
        control.pause();
        assert_eq!(guard.control().state(), ControlState { paused: true, stopped: false });
        control.stop();
        assert_eq!(guard.control().state(), ControlState { paused: false, stopped: true });
    }

    #[tokio::test(start_paused = true)]
    async fn resume_wakes_a_paused_wait_before_the_poll_interval() {
        let registry = ControlRegistry::new();
        let guard = registry.register(JobId::new()).unwrap();
        let control = registry.get(guard.id()).unwrap();
        control.pause();

        let waker = {
            let control = Arc::clone(&control);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                control.resume();
            })
        };

        let start = Instant::now();
        let state = guard.control().wait_while_paused(Duration::from_secs(10)).await;
        assert!(!state.paused && !state.stopped);
        assert!(start.elapsed() < Duration::from_secs(1));
        waker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_a_paused_wait() {
        let registry = ControlRegistry::new();
        let guard = registry.register(JobId::new()).unwrap();
        let control = registry.get(guard.id()).unwrap();
        control.pause();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            control.stop();
        });

        let state = guard.control().wait_while_paused(Duration::from_secs(1)).await;
        assert!(state.stopped);
        stopper.await.unwrap();
    }
}
