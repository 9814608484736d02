//! Job engine: drives one job from `queued` to a terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn, Instrument};

use autoedit_media::{CutRange, MediaAssembler, VideoProber};
use autoedit_models::{DurationSummary, Job, JobId, JobOutcome};
use autoedit_store::JobStore;

use crate::error::WorkerResult;
use crate::locator::{LocateRequest, SegmentLocator};
use crate::logging::JobLogger;
use crate::metrics;
use crate::script::extract_script;
use crate::segments::normalize_segments;

/// Checkpoints per job.
pub const TOTAL_STEPS: u32 = 4;

/// Estimated processing time used when the video could not be probed.
pub const DEFAULT_ESTIMATE_SECS: u64 = 180;

/// Lower bound for processing time estimates.
pub const MIN_ESTIMATE_SECS: u64 = 30;

/// Rough processing time for a video of `duration` seconds.
pub fn estimate_processing_seconds(duration: Option<f64>, factor: f64) -> u64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => ((d * factor).round() as u64).max(MIN_ESTIMATE_SECS),
        _ => DEFAULT_ESTIMATE_SECS,
    }
}

/// Where the finished video for `job` is written.
pub fn output_path_for(job: &Job) -> PathBuf {
    let stem = job
        .video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    job.work_dir.join(format!("processed_{}.mp4", stem))
}

/// Runs jobs against the store and the media collaborators.
#[derive(Clone)]
pub struct JobEngine {
    store: Arc<JobStore>,
    locator: Arc<dyn SegmentLocator>,
    prober: Arc<dyn VideoProber>,
    assembler: Arc<dyn MediaAssembler>,
}

impl JobEngine {
    pub fn new(
        store: Arc<JobStore>,
        locator: Arc<dyn SegmentLocator>,
        prober: Arc<dyn VideoProber>,
        assembler: Arc<dyn MediaAssembler>,
    ) -> Self {
        Self {
            store,
            locator,
            prober,
            assembler,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Process a job to completion or failure. Never returns an error.
    pub async fn run(&self, id: &JobId) {
        let logger = JobLogger::new(id);
        let span = logger.span();

        async {
            let started = Instant::now();
            metrics::record_job_started();
            logger.started();

            match self.process(id, &logger).await {
                Ok(segments) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    metrics::record_job_completed(elapsed);
                    logger.completed(elapsed, segments);
                }
                Err(e) => self.fail(id, &e.to_string()).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Mark a job failed, discard any output and persist.
    pub async fn fail(&self, id: &JobId, message: &str) {
        let logger = JobLogger::new(id);

        match self.store.update(id, |job| job.fail(message).map(|_| output_path_for(job))).await {
            Ok(Ok(output)) => {
                logger.failed(message);
                metrics::record_job_failed();
                discard_file(&output).await;
                self.store.persist_logged().await;
            }
            Ok(Err(e)) => logger.warn(format_args!("Not marking job failed: {}", e)),
            Err(e) => logger.warn(format_args!("Cannot record failure: {}", e)),
        }
    }

    async fn process(&self, id: &JobId, logger: &JobLogger) -> WorkerResult<usize> {
        self.store
            .update(id, |job| job.start(TOTAL_STEPS, Utc::now()))
            .await??;
        self.store.persist_logged().await;

        let job = self.store.get(id).await?;

        // Step 1
        self.checkpoint(id, 1, "Reading script", logger).await?;
        let script_text = match (&job.script_text, &job.script_path) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => {
                let text = extract_script(path.clone()).await?;
                self.store.update(id, |job| job.resolve_script(text.clone())).await?;
                text
            }
            (None, None) => String::new(),
        };

        // Step 2
        self.checkpoint(id, 2, "Analyzing video with AI", logger).await?;
        let video = self.prober.probe(&job.video_path).await?;
        let located = self
            .locator
            .locate(&LocateRequest {
                video_path: &job.video_path,
                video: &video,
                script_text: &script_text,
            })
            .await?;

        // Step 3
        self.checkpoint(id, 3, "Validating segments", logger).await?;
        let normalized = normalize_segments(&located.segments, video.duration);
        if normalized.discarded > 0 {
            logger.warn(format_args!("Discarded {} invalid segments", normalized.discarded));
        }
        if normalized.fell_back {
            logger.warn("No valid segments, using the whole video");
        }

        // Step 4
        self.checkpoint(id, 4, "Creating edited video", logger).await?;
        let output_path = output_path_for(&job);
        let cuts: Vec<CutRange> = normalized
            .segments
            .iter()
            .map(|s| CutRange::new(s.start, s.end))
            .collect();

        debug!(output = %output_path.display(), cuts = cuts.len(), "Assembling output");
        if let Err(e) = self.assembler.assemble(&job.video_path, &cuts, &output_path).await {
            discard_file(&output_path).await;
            return Err(e.into());
        }

        let segment_count = normalized.segments.len();
        let outcome = JobOutcome {
            output_path,
            duration: DurationSummary::from_segments(video.duration, &normalized.segments),
            segments: normalized.segments,
            analysis: located.analysis,
        };
        self.store.update(id, |job| job.complete(outcome)).await??;
        self.store.persist_logged().await;

        Ok(segment_count)
    }

    /// Record a checkpoint, persisting on the first and every even step.
    async fn checkpoint(&self, id: &JobId, step: u32, message: &str, logger: &JobLogger) -> WorkerResult<()> {
        self.store
            .update(id, |job| job.record_progress(step, message, Utc::now()))
            .await??;
        logger.step(step, TOTAL_STEPS, message);

        if step == 1 || step % 2 == 0 {
            self.store.persist_logged().await;
        }
        Ok(())
    }
}

async fn discard_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Discarded partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to discard output: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use autoedit_media::{MediaError, MediaResult, VideoInfo};
    use autoedit_models::JobStatus;
    use serde_json::json;

    use crate::error::WorkerError;
    use crate::locator::{LocatorOutput, RawSegment};

    pub(crate) struct FakeProber(pub f64);

    #[async_trait]
    impl VideoProber for FakeProber {
        async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
            Ok(VideoInfo {
                duration: self.0,
                width: 1920,
                height: 1080,
                fps: 30.0,
            })
        }
    }

    pub(crate) struct FakeLocator {
        pub response: serde_json::Value,
    }

    #[async_trait]
    impl SegmentLocator for FakeLocator {
        async fn locate(&self, request: &LocateRequest<'_>) -> WorkerResult<LocatorOutput> {
            let segments: Vec<RawSegment> = serde_json::from_value(self.response.clone())
                .map_err(|e| WorkerError::ai_failed(e.to_string()))?;
            Ok(LocatorOutput {
                segments,
                analysis: format!("matched '{}'", request.script_text),
            })
        }
    }

    struct FailingLocator;

    #[async_trait]
    impl SegmentLocator for FailingLocator {
        async fn locate(&self, _request: &LocateRequest<'_>) -> WorkerResult<LocatorOutput> {
            Err(WorkerError::ai_failed("service unavailable"))
        }
    }

    /// Writes the cut list to the output file.
    pub(crate) struct FakeAssembler;

    #[async_trait]
    impl MediaAssembler for FakeAssembler {
        async fn assemble(&self, source: &Path, cuts: &[CutRange], output: &Path) -> MediaResult<()> {
            let body = format!("{} {:?}", source.display(), cuts);
            tokio::fs::write(output, body).await?;
            Ok(())
        }
    }

    /// Leaves a partial file behind and fails.
    struct BrokenAssembler;

    #[async_trait]
    impl MediaAssembler for BrokenAssembler {
        async fn assemble(&self, _source: &Path, _cuts: &[CutRange], output: &Path) -> MediaResult<()> {
            tokio::fs::write(output, b"partial").await?;
            Err(MediaError::ffmpeg_failed("encode failed", None, Some(1)))
        }
    }

    async fn queued_job(store: &JobStore, root: &Path, script: Option<&str>) -> Job {
        let id = JobId::new();
        let work_dir = root.join(id.as_str());
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let video_path = work_dir.join("input.mp4");
        tokio::fs::write(&video_path, b"video").await.unwrap();

        let job = Job::new(id, &work_dir, video_path, None, script.map(str::to_string));
        store.create(job.clone()).await.unwrap();
        job
    }

    fn engine(store: Arc<JobStore>, locator: Arc<dyn SegmentLocator>, assembler: Arc<dyn MediaAssembler>) -> JobEngine {
        JobEngine::new(store, locator, Arc::new(FakeProber(120.0)), assembler)
    }

    #[test]
    fn test_estimate_processing_seconds() {
        assert_eq!(estimate_processing_seconds(Some(100.0), 1.5), 150);
        assert_eq!(estimate_processing_seconds(Some(4.0), 1.5), 30);
        assert_eq!(estimate_processing_seconds(None, 1.5), 180);
        assert_eq!(estimate_processing_seconds(Some(0.0), 1.5), 180);
    }

    #[tokio::test]
    async fn test_run_completes_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let job = queued_job(&store, dir.path(), Some("the demo")).await;

        let locator = Arc::new(FakeLocator {
            response: json!([
                {"start_time": 0, "end_time": 60, "description": "demo"},
                {"start": "90", "end": "120"}
            ]),
        });
        engine(Arc::clone(&store), locator, Arc::new(FakeAssembler)).run(&job.id).await;

        let done = store.get(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error.is_none());
        assert_eq!(done.segments.len(), 2);
        assert_eq!(done.reduction_percentage, Some(25.0));
        assert_eq!(done.analysis.as_deref(), Some("matched 'the demo'"));

        let progress = done.progress.unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.current_step, TOTAL_STEPS);

        let output = done.output_path.unwrap();
        assert_eq!(output, job.work_dir.join("processed_input.mp4"));
        assert!(output.exists());

        // Snapshot reflects the terminal state
        let reloaded = JobStore::load(store.path()).await;
        assert_eq!(reloaded.get(&job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_locator_failure_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let job = queued_job(&store, dir.path(), None).await;

        engine(Arc::clone(&store), Arc::new(FailingLocator), Arc::new(FakeAssembler))
            .run(&job.id)
            .await;

        let failed = store.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.output_path.is_none());
        assert!(failed.error.unwrap().contains("service unavailable"));
        assert_eq!(failed.progress.unwrap().percent, 100);
    }

    #[tokio::test]
    async fn test_assembler_failure_discards_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let job = queued_job(&store, dir.path(), Some("")).await;
        let locator = Arc::new(FakeLocator { response: json!([]) });

        engine(Arc::clone(&store), locator, Arc::new(BrokenAssembler)).run(&job.id).await;

        let failed = store.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.output_path.is_none());
        assert!(!output_path_for(&job).exists());
    }

    #[tokio::test]
    async fn test_script_file_is_read_in_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));

        let id = JobId::new();
        let work_dir = dir.path().join(id.as_str());
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let script_path = work_dir.join("script.txt");
        tokio::fs::write(&script_path, "show the ending").await.unwrap();
        let job = Job::new(id.clone(), &work_dir, work_dir.join("input.mp4"), Some(script_path), None);
        store.create(job).await.unwrap();

        let locator = Arc::new(FakeLocator { response: json!([{"start": 100, "end": 120}]) });
        engine(Arc::clone(&store), locator, Arc::new(FakeAssembler)).run(&id).await;

        let done = store.get(&id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.script_text.as_deref(), Some("show the ending"));
        assert_eq!(done.analysis.as_deref(), Some("matched 'show the ending'"));
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let job = queued_job(&store, dir.path(), Some("x")).await;
        let locator = Arc::new(FakeLocator { response: json!([]) });
        let engine = engine(Arc::clone(&store), locator, Arc::new(FakeAssembler));

        engine.fail(&job.id, "cancelled").await;
        engine.run(&job.id).await;

        let failed = store.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
        let first = queued_job(&store, dir.path(), Some("a")).await;
        let second = queued_job(&store, dir.path(), Some("b")).await;

        let locator = Arc::new(FakeLocator { response: json!([{"start": 5, "end": 50}]) });
        let engine = engine(Arc::clone(&store), locator, Arc::new(FakeAssembler));

        tokio::join!(engine.run(&first.id), engine.run(&second.id));

        let a = store.get(&first.id).await.unwrap();
        let b = store.get(&second.id).await.unwrap();
        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(b.status, JobStatus::Completed);

        let (out_a, out_b) = (a.output_path.unwrap(), b.output_path.unwrap());
        assert_ne!(out_a, out_b);
        assert_eq!(out_a.parent(), Some(first.work_dir.as_path()));
        assert_eq!(out_b.parent(), Some(second.work_dir.as_path()));

        // Each output was cut from its own source
        let body_a = tokio::fs::read_to_string(&out_a).await.unwrap();
        let body_b = tokio::fs::read_to_string(&out_b).await.unwrap();
        assert!(body_a.starts_with(&first.video_path.display().to_string()));
        assert!(body_b.starts_with(&second.video_path.display().to_string()));
    }
}
