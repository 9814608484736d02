//! Retention sweeper: deletes jobs and their files once they expire.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use autoedit_models::{Job, JobId};
use autoedit_store::JobStore;

use crate::metrics;

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub removed: Vec<JobId>,
}

impl SweepReport {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

/// Periodically removes jobs older than the retention window.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Sweep forever, first after one interval.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            "Starting retention sweeper"
        );

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.sweep().await;
            debug!(removed = report.count(), "Retention sweep finished");
        }
    }

    /// Run one pass now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run one pass as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);

        let expired: Vec<JobId> = self
            .store
            .list_all()
            .await
            .into_iter()
            .filter(|job| now - job.created_at > retention)
            .map(|job| job.id)
            .collect();

        let mut report = SweepReport::default();
        for id in expired {
            // Take the record first so nothing can observe a job whose files are gone
            let job = match self.store.delete(&id).await {
                Ok(job) => job,
                Err(e) => {
                    debug!(job_id = %id, "Job already removed: {}", e);
                    continue;
                }
            };
            remove_job_files(&job).await;
            info!(job_id = %id, created_at = %job.created_at, "Removed expired job");
            report.removed.push(id);
        }

        if !report.removed.is_empty() {
            self.store.persist_logged().await;
            metrics::record_jobs_swept(report.count());
            info!(count = report.count(), "Cleaned up expired jobs");
        }

        report
    }
}

/// Best-effort removal of everything a job owns.
async fn remove_job_files(job: &Job) {
    let files = [
        Some(job.video_path.as_path()),
        job.script_path.as_deref(),
        job.output_path.as_deref(),
    ];
    for path in files.into_iter().flatten() {
        remove_path(path, false).await;
    }
    remove_path(&job.work_dir, true).await;
}

async fn remove_path(path: &Path, is_dir: bool) {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => debug!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    async fn job_aged(store: &JobStore, root: &Path, age_secs: i64) -> Job {
        let id = JobId::new();
        let work_dir = root.join(id.as_str());
        tokio::fs::create_dir_all(&work_dir).await.unwrap();

        let video_path = work_dir.join("input.mp4");
        let script_path = work_dir.join("script.txt");
        tokio::fs::write(&video_path, b"video").await.unwrap();
        tokio::fs::write(&script_path, b"script").await.unwrap();

        let mut job = Job::new(id, &work_dir, video_path, Some(script_path), None);
        job.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
        store.create(job.clone()).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_expired_job_is_removed_with_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let old = job_aged(&store, dir.path(), 90_000).await;
        let sweeper = RetentionSweeper::new(Arc::clone(&store), DAY, Duration::from_secs(3600));

        let report = sweeper.sweep().await;

        assert_eq!(report.removed, vec![old.id.clone()]);
        assert!(store.get(&old.id).await.is_err());
        assert!(!old.video_path.exists());
        assert!(!old.script_path.unwrap().exists());
        assert!(!old.work_dir.exists());

        let reloaded = JobStore::load(store.path()).await;
        assert!(reloaded.is_empty().await);
    }

    #[tokio::test]
    async fn test_recent_job_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let recent = job_aged(&store, dir.path(), 1000).await;
        let sweeper = RetentionSweeper::new(Arc::clone(&store), DAY, Duration::from_secs(3600));

        let report = sweeper.sweep().await;

        assert!(report.removed.is_empty());
        assert!(store.get(&recent.id).await.is_ok());
        assert!(recent.video_path.exists());
        // Nothing removed, nothing persisted
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_retention_boundary_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let job = job_aged(&store, dir.path(), 0).await;
        let sweeper = RetentionSweeper::new(Arc::clone(&store), DAY, Duration::from_secs(3600));

        let exactly = job.created_at + chrono::Duration::seconds(86_400);
        assert!(sweeper.sweep_at(exactly).await.removed.is_empty());

        let after = exactly + chrono::Duration::seconds(1);
        assert_eq!(sweeper.sweep_at(after).await.count(), 1);
    }

    #[tokio::test]
    async fn test_missing_files_do_not_stop_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let first = job_aged(&store, dir.path(), 100_000).await;
        let second = job_aged(&store, dir.path(), 100_000).await;
        tokio::fs::remove_dir_all(&first.work_dir).await.unwrap();

        let sweeper = RetentionSweeper::new(Arc::clone(&store), DAY, Duration::from_secs(3600));
        let report = sweeper.sweep().await;

        assert_eq!(report.count(), 2);
        assert!(!second.work_dir.exists());
    }
}
