//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use autoedit_media::{check_ffmpeg, check_ffprobe, FfmpegAssembler, FfprobeProber, HardwareInfo, MediaAssembler, VideoProber};
use autoedit_store::JobStore;
use autoedit_worker::{GeminiLocator, JobEngine, JobExecutor, RetentionSweeper, SegmentLocator, WorkerConfig};

use crate::config::ApiConfig;
use crate::error::{self, ApiError, ApiResult};

/// Error recorded for jobs left unfinished by a previous run.
pub const RESTART_INTERRUPTED_MESSAGE: &str = "Processing was interrupted by a server restart";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<JobStore>,
    pub executor: Arc<JobExecutor>,
    pub sweeper: RetentionSweeper,
    pub prober: Arc<dyn VideoProber>,
    /// Expected processing seconds per second of video
    pub processing_factor: f64,
}

impl AppState {
    /// Create new application state with the production collaborators.
    pub async fn new(config: ApiConfig, worker: WorkerConfig) -> ApiResult<Self> {
        if let Err(e) = check_ffmpeg().and_then(|_| check_ffprobe()) {
            warn!("{}; video processing will fail until it is installed", e);
        }
        if worker.gemini.api_key.is_none() {
            warn!("GEMINI_API_KEY not set; every job will fail at the analysis step");
        }

        let hardware_config = worker.hardware();
        let hardware = tokio::task::spawn_blocking(move || HardwareInfo::detect(&hardware_config))
            .await
            .map_err(|e| ApiError::Config(format!("hardware detection failed: {}", e)))?;
        info!(
            "Hardware: {} (safe GPU memory limit {}MB)",
            hardware,
            hardware.safe_memory_limit_mb(worker.gpu_memory_safety_factor)
        );

        tokio::fs::create_dir_all(&config.upload_folder).await?;

        let store = Arc::new(JobStore::load(&config.jobs_data_file).await);
        let interrupted = store.fail_interrupted(RESTART_INTERRUPTED_MESSAGE).await;
        if !interrupted.is_empty() {
            warn!(count = interrupted.len(), "Marked interrupted jobs as failed");
            store.persist_logged().await;
        }

        let assembler = FfmpegAssembler::new(&hardware, worker.ffmpeg_timeout());
        info!(encoder = assembler.preferred_encoder(), "Media assembler ready");

        Ok(Self::from_parts(
            config,
            &worker,
            store,
            Arc::new(GeminiLocator::new(worker.gemini.clone())?),
            Arc::new(FfprobeProber),
            Arc::new(assembler),
        ))
    }

    /// Assemble state from explicit collaborators and start the executor.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_parts(
        config: ApiConfig,
        worker: &WorkerConfig,
        store: Arc<JobStore>,
        locator: Arc<dyn SegmentLocator>,
        prober: Arc<dyn VideoProber>,
        assembler: Arc<dyn MediaAssembler>,
    ) -> Self {
        error::hide_internal_details(config.is_production());

        let engine = JobEngine::new(Arc::clone(&store), locator, Arc::clone(&prober), assembler);
        let executor = Arc::new(JobExecutor::start(engine, worker));
        let sweeper = RetentionSweeper::new(Arc::clone(&store), worker.retention(), worker.cleanup_interval());

        Self {
            config,
            store,
            executor,
            sweeper,
            prober,
            processing_factor: worker.processing_factor,
        }
    }
}
