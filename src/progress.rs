//! Progress-callback trait for per-unit job events.
//!
//! Pass an [`Arc<dyn JobProgressCallback>`] to
//! [`crate::job::Orchestrator::with_progress`] to receive events as a job
//! moves through its units. Events that follow a checkpoint (stage start,
//! unit error, unit complete, pause, resume, finish) fire after it has been
//! persisted, so a callback that reads the store sees the state the event
//! describes. `on_unit_start` fires before the unit is dispatched.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doctrans::{JobId, JobProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl JobProgressCallback for Counter {
//!     fn on_unit_complete(&self, _job: JobId, _stage: Stage, cursor: usize, total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{cursor}/{total}");
//!     }
//! }
//! ```

use crate::job::{JobId, JobStatus, Stage};
use std::sync::Arc;

/// Called by the orchestrator as a job runs.
///
/// Implementations must be `Send + Sync`: several jobs may run at once, each
/// on its own task. Every method has a no-op default.
pub trait JobProgressCallback: Send + Sync {
    /// A run starts (or resumes) a stage with `total` units at `cursor`.
    fn on_stage_start(&self, job: JobId, stage: Stage, cursor: usize, total: usize) {
        let _ = (job, stage, cursor, total);
    }

    /// Unit `index` (0-based) is about to be dispatched.
    fn on_unit_start(&self, job: JobId, stage: Stage, index: usize, total: usize) {
        let _ = (job, stage, index, total);
    }

    /// A unit finished and the job now stands at `cursor`.
    fn on_unit_complete(&self, job: JobId, stage: Stage, cursor: usize, total: usize) {
        let _ = (job, stage, cursor, total);
    }

    /// Unit `index` failed after retries; its error placeholder was recorded.
    fn on_unit_error(&self, job: JobId, stage: Stage, index: usize, error: &str) {
        let _ = (job, stage, index, error);
    }

    /// The job was paused before processing unit `cursor`.
    fn on_paused(&self, job: JobId, cursor: usize, total: usize) {
        let _ = (job, cursor, total);
    }

    /// A paused job continues.
    fn on_resumed(&self, job: JobId, cursor: usize, total: usize) {
        let _ = (job, cursor, total);
    }

    /// The run ended with `status` (COMPLETED, STOPPED or FAILED).
    fn on_job_finished(&self, job: JobId, status: JobStatus) {
        let _ = (job, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Type stored by the orchestrator.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        errors: AtomicUsize,
        last_cursor: AtomicUsize,
    }

    impl JobProgressCallback for Tracking {
        fn on_unit_complete(&self, _job: JobId, _stage: Stage, cursor: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.last_cursor.store(cursor, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _job: JobId, _stage: Stage, _index: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        let id = JobId::new();
        cb.on_stage_start(id, Stage::Translation, 0, 3);
        cb.on_unit_start(id, Stage::Translation, 0, 3);
        cb.on_unit_complete(id, Stage::Translation, 1, 3);
        cb.on_unit_error(id, Stage::Translation, 1, "timeout");
        cb.on_paused(id, 1, 3);
        cb.on_resumed(id, 1, 3);
        cb.on_job_finished(id, JobStatus::Completed);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let tracker = Tracking::default();
        let id = JobId::new();
        tracker.on_unit_complete(id, Stage::Recognition, 1, 2);
        tracker.on_unit_error(id, Stage::Recognition, 1, "HTTP 502");
        tracker.on_unit_complete(id, Stage::Recognition, 2, 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.last_cursor.load(Ordering::SeqCst), 2);
    }
}
