//! Persistence collaborators.
//!
//! The orchestrator and the correction matcher only see the two traits
//! below. [`MemoryStore`] keeps everything in process (tests, embedders that
//! bring their own durability); [`FileStore`] keeps one JSON document per job
//! so a run interrupted in one process can be resumed from another.
//!
//! `save` must be atomic per call: a reader never observes a half-written job.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::correction::Correction;
use crate::error::StoreError;
use crate::job::{Job, JobId};
use async_trait::async_trait;
use uuid::Uuid;

/// Job persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job, or `None` when no job with this id exists.
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Insert or replace a job atomically.
    async fn save(&self, job: &Job) -> Result<(), StoreError>;
}

/// Correction persistence.
#[async_trait]
pub trait CorrectionStore: Send + Sync {
    /// Corrections for a language pair, most recently used first; never-used
    /// corrections follow, newest first.
    async fn load_corrections(
        &self,
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<Correction>, StoreError>;

    /// Bump the usage counter and stamp `last_used_at`. Unknown ids are ignored.
    async fn increment_usage(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_correction(&self, correction: &Correction) -> Result<(), StoreError>;

    /// Every stored correction, in the same order as `load_corrections`.
    async fn list_corrections(&self) -> Result<Vec<Correction>, StoreError>;

    /// Returns whether a correction was removed.
    async fn delete_correction(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Recency order shared by both stores.
pub(crate) fn sort_by_recency(corrections: &mut [Correction]) {
    corrections.sort_by(|a, b| {
        b.last_used_at
            .cmp(&a.last_used_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

pub(crate) fn matches_pair(c: &Correction, source_language: &str, target_language: &str) -> bool {
    c.source_language == source_language && c.target_language == target_language
}
