use super::{matches_pair, sort_by_recency, CorrectionStore, JobStore};
use crate::correction::Correction;
use crate::error::StoreError;
use crate::job::{Job, JobId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// In-process store for jobs and corrections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    corrections: Mutex<Vec<Correction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job.
    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.jobs).values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(())
    }
}

#[async_trait]
impl CorrectionStore for MemoryStore {
    async fn load_corrections(
        &self,
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<Correction>, StoreError> {
        let mut found: Vec<Correction> = lock(&self.corrections)
            .iter()
            .filter(|c| matches_pair(c, source_language, target_language))
            .cloned()
            .collect();
        sort_by_recency(&mut found);
        Ok(found)
    }

    async fn increment_usage(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(c) = lock(&self.corrections).iter_mut().find(|c| c.id == id) {
            c.usage_count += 1;
            c.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_correction(&self, correction: &Correction) -> Result<(), StoreError> {
        let mut all = lock(&self.corrections);
        all.retain(|c| c.id != correction.id);
        all.push(correction.clone());
        Ok(())
    }

    async fn list_corrections(&self) -> Result<Vec<Correction>, StoreError> {
        let mut all = lock(&self.corrections).clone();
        sort_by_recency(&mut all);
        Ok(all)
    }

    async fn delete_correction(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut all = lock(&self.corrections);
        let before = all.len();
        all.retain(|c| c.id != id);
        Ok(all.len() != before)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::NewCorrection;
    use crate::job::{JobKind, JobSource};

    #[tokio::test]
    async fn saves_and_loads_jobs() {
        let store = MemoryStore::new();
        let job = Job::new(JobKind::Translate, JobSource::Text { text: "Hi.".into() }, None);
        assert!(store.load(job.id).await.unwrap().is_none());
        store.save(&job).await.unwrap();
        assert_eq!(store.load(job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn usage_moves_correction_to_the_front() {
        let store = MemoryStore::new();
        let older = Correction::from_new(NewCorrection::new("a", "A", "en", "de"), None);
        let newer = Correction::from_new(NewCorrection::new("b", "B", "en", "de"), None);
        let other_pair = Correction::from_new(NewCorrection::new("c", "C", "en", "zh"), None);
        for c in [&older, &newer, &other_pair] {
            store.insert_correction(c).await.unwrap();
        }

        let listed = store.load_corrections("en", "de").await.unwrap();
        assert_eq!(listed.len(), 2);

        store.increment_usage(older.id).await.unwrap();
        let listed = store.load_corrections("en", "de").await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[0].usage_count, 1);
        assert!(listed[0].last_used_at.is_some());

        assert!(store.delete_correction(newer.id).await.unwrap());
        assert!(!store.delete_correction(newer.id).await.unwrap());
        assert_eq!(store.list_corrections().await.unwrap().len(), 2);
    }
}
