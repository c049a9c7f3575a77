use super::{matches_pair, sort_by_recency, CorrectionStore, JobStore};
use crate::correction::Correction;
use crate::error::StoreError;
use crate::job::{Job, JobId};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// JSON files under one directory:
///
/// ```text
/// <root>/jobs/<job-id>.json
/// <root>/corrections.json
/// ```
///
/// Every write goes to a temp file in the target directory and is then
/// renamed over the destination, so readers see either the old or the new
/// document. Correction updates are read-modify-write and serialised by an
/// in-process lock; two processes editing corrections at once can still lose
/// an update.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    corrections_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let jobs = root.join("jobs");
        tokio::fs::create_dir_all(&jobs)
            .await
            .map_err(|e| io_error(&jobs, e))?;
        Ok(Self {
            root,
            corrections_lock: Mutex::new(()),
        })
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }

    fn corrections_path(&self) -> PathBuf {
        self.root.join("corrections.json")
    }

    async fn read_corrections(&self) -> Result<Vec<Correction>, StoreError> {
        Ok(read_json(&self.corrections_path()).await?.unwrap_or_default())
    }

    async fn write_corrections(&self, corrections: &[Correction]) -> Result<(), StoreError> {
        write_json_atomic(self.corrections_path(), corrections).await
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        read_json(&self.job_path(id)).await
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        write_json_atomic(self.job_path(job.id), job).await
    }
}

#[async_trait]
impl CorrectionStore for FileStore {
    async fn load_corrections(
        &self,
        source_language: &str,
        target_language: &str,
    ) -> Result<Vec<Correction>, StoreError> {
        let mut found: Vec<Correction> = self
            .read_corrections()
            .await?
            .into_iter()
            .filter(|c| matches_pair(c, source_language, target_language))
            .collect();
        sort_by_recency(&mut found);
        Ok(found)
    }

    async fn increment_usage(&self, id: Uuid) -> Result<(), StoreError> {
        let _guard = self.corrections_lock.lock().await;
        let mut all = self.read_corrections().await?;
        let Some(c) = all.iter_mut().find(|c| c.id == id) else {
            return Ok(());
        };
        c.usage_count += 1;
        c.last_used_at = Some(Utc::now());
        self.write_corrections(&all).await
    }

    async fn insert_correction(&self, correction: &Correction) -> Result<(), StoreError> {
        let _guard = self.corrections_lock.lock().await;
        let mut all = self.read_corrections().await?;
        all.retain(|c| c.id != correction.id);
        all.push(correction.clone());
        self.write_corrections(&all).await
    }

    async fn list_corrections(&self) -> Result<Vec<Correction>, StoreError> {
        let mut all = self.read_corrections().await?;
        sort_by_recency(&mut all);
        Ok(all)
    }

    async fn delete_correction(&self, id: Uuid) -> Result<bool, StoreError> {
        let _guard = self.corrections_lock.lock().await;
        let mut all = self.read_corrections().await?;
        let before = all.len();
        all.retain(|c| c.id != id);
        if all.len() == before {
            return Ok(false);
        }
        self.write_corrections(&all).await?;
        Ok(true)
    }
}

// ── JSON helpers ─────────────────────────────────────────────────────────────

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Serialise, then write through a uniquely named temp file and rename.
/// Runs on the blocking pool since `tempfile` is synchronous.
async fn write_json_atomic<T: Serialize + ?Sized>(path: PathBuf, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| StoreError::Unavailable(format!("write task panicked: {e}")))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::NewCorrection;
    use crate::job::{JobKind, JobSource, JobStatus};

    #[tokio::test]
    async fn job_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let mut job = Job::new(JobKind::Translate, JobSource::Text { text: "Hi.".into() }, None);
        store.save(&job).await.unwrap();
        job.status = JobStatus::Processing;
        job.cursor = 1;
        store.save(&job).await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(job.id).await.unwrap(), Some(job));
        assert!(reopened.load(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_temp_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let job = Job::new(JobKind::Translate, JobSource::Text { text: "Hi.".into() }, None);
        store.save(&job).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("jobs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", job.id)]);
    }

    #[tokio::test]
    async fn corrections_persist_with_usage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let c = Correction::from_new(NewCorrection::new("cat", "Katze", "en", "de"), Some(vec![1.0, 0.0]));
        store.insert_correction(&c).await.unwrap();
        store.increment_usage(c.id).await.unwrap();

        let loaded = store.load_corrections("en", "de").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].usage_count, 1);
        assert_eq!(loaded[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
        assert!(store.load_corrections("de", "en").await.unwrap().is_empty());

        assert!(store.delete_correction(c.id).await.unwrap());
        assert!(store.list_corrections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_job_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let id = JobId::new();
        std::fs::write(dir.path().join("jobs").join(format!("{id}.json")), b"{not json").unwrap();
        assert!(matches!(store.load(id).await, Err(StoreError::Serde(_))));
    }
}
