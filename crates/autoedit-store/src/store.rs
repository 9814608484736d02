//! In-memory job table with snapshot persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use autoedit_models::{Job, JobId};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::snapshot;

/// Durable record of every job.
///
/// The in-memory table is the source of truth; the snapshot file is only read
/// by [`JobStore::load`]. Snapshot writes are serialized, so they reach disk
/// in the order they were taken.
#[derive(Debug)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JobStore {
    /// Create an empty store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the snapshot at `path`.
    ///
    /// A missing or unreadable snapshot yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);

        match snapshot::read(&store.path).await {
            Ok(Some(jobs)) => {
                info!(path = %store.path.display(), count = jobs.len(), "Loaded job snapshot");
                *store.jobs.write().await = jobs;
            }
            Ok(None) => {
                info!(path = %store.path.display(), "No job snapshot found, starting empty");
            }
            Err(e) => {
                warn!(path = %store.path.display(), "Failed to load job snapshot, starting empty: {}", e);
            }
        }

        store
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new job. Ids are never reused.
    pub async fn create(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Get a copy of a job.
    pub async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Mutate a job in place under the table lock.
    pub async fn update<F, R>(&self, id: &JobId, mutator: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(mutator(job))
    }

    /// Remove a job and return it.
    pub async fn delete(&self, id: &JobId) -> StoreResult<Job> {
        self.jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Copies of all jobs.
    pub async fn list_all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Number of jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the store holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Write the whole table to the snapshot file.
    pub async fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = {
            let jobs = self.jobs.read().await;
            snapshot::encode(&jobs)?
        };
        snapshot::write_atomic(&self.path, &bytes).await
    }

    /// Persist, logging instead of returning failures.
    pub async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(path = %self.path.display(), "Failed to persist jobs: {}", e);
        }
    }

    /// Fail every job left unfinished by a previous process.
    ///
    /// Returns the ids that were failed.
    pub async fn fail_interrupted(&self, reason: &str) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let mut failed = Vec::new();

        for job in jobs.values_mut().filter(|job| !job.status.is_terminal()) {
            if job.fail(reason).is_ok() {
                failed.push(job.id.clone());
            }
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoedit_models::JobStatus;
    use chrono::Utc;
    use std::sync::Arc;

    fn job_in(dir: &Path) -> Job {
        let id = JobId::new();
        let work_dir = dir.join(id.as_str());
        Job::new(id, &work_dir, work_dir.join("input.mp4"), None, Some(String::new()))
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        let job = job_in(dir.path());
        let id = job.id.clone();

        store.create(job).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Queued);

        store.delete(&id).await.unwrap();
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        let job = job_in(dir.path());

        store.create(job.clone()).await.unwrap();
        assert!(matches!(store.create(job).await, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_returns_mutator_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));
        let job = job_in(dir.path());
        let id = job.id.clone();
        store.create(job).await.unwrap();

        let result = store.update(&id, |job| job.start(4, Utc::now())).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Processing);

        let missing = store.update(&JobId::new(), |_| ()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JobStore::new(&path);
        let job = job_in(dir.path());
        let id = job.id.clone();
        store.create(job).await.unwrap();
        store.persist().await.unwrap();

        let reloaded = JobStore::load(&path).await;
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(reloaded.get(&id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_interrupted_write_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JobStore::new(&path);
        let job = job_in(dir.path());
        let id = job.id.clone();
        store.create(job).await.unwrap();
        store.persist().await.unwrap();

        // A crash after the temp file was partly written but before the rename
        tokio::fs::write(snapshot::temp_path(&path), b"{\"truncated\": ")
            .await
            .unwrap();

        let reloaded = JobStore::load(&path).await;
        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = JobStore::load(&path).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // The snapshot path is a directory, so the rename cannot succeed
        let path = dir.path().join("occupied");
        tokio::fs::create_dir_all(path.join("child")).await.unwrap();

        let store = JobStore::new(&path);
        store.create(job_in(dir.path())).await.unwrap();
        assert!(store.persist().await.is_err());
        store.persist_logged().await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_fail_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json"));

        let queued = job_in(dir.path());
        let mut running = job_in(dir.path());
        running.start(4, Utc::now()).unwrap();
        let mut done = job_in(dir.path());
        done.start(4, Utc::now()).unwrap();
        done.fail("boom").unwrap();

        let done_id = done.id.clone();
        for job in [queued, running, done] {
            store.create(job).await.unwrap();
        }

        let failed = store.fail_interrupted("interrupted").await;
        assert_eq!(failed.len(), 2);
        assert_eq!(store.get(&done_id).await.unwrap().error.as_deref(), Some("boom"));
        for job in store.list_all().await {
            assert_eq!(job.status, JobStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_concurrent_updates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = Arc::new(JobStore::new(&path));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let job = job_in(dir.path());
            handles.push(tokio::spawn(async move {
                let id = job.id.clone();
                store.create(job).await.unwrap();
                store.update(&id, |job| job.start(4, Utc::now())).await.unwrap().unwrap();
                store.persist().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reloaded = JobStore::load(&path).await;
        assert_eq!(reloaded.len().await, 8);
    }
}
