//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use autoedit_media::{GpuPreference, HardwareConfig};
use validator::Validate;

use crate::error::{WorkerError, WorkerResult};

/// Gemini API settings.
#[derive(Debug, Clone, Validate)]
pub struct GeminiConfig {
    /// API key; locating segments fails without one
    pub api_key: Option<String>,
    /// Model used for generateContent
    #[validate(length(min = 1))]
    pub model: String,
    /// API root, overridable for tests
    #[validate(length(min = 1))]
    pub base_url: String,
    /// Timeout for each Gemini API request
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    /// Delay between file state polls
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,
    /// Longest wait for an uploaded file to become active
    #[validate(range(min = 1))]
    pub max_upload_wait_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-pro".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            request_timeout_secs: 600,
            poll_interval_secs: 5,
            max_upload_wait_secs: 600,
        }
    }
}

impl GeminiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            request_timeout_secs: env_or("GEMINI_REQUEST_TIMEOUT", defaults.request_timeout_secs),
            poll_interval_secs: env_or("GEMINI_POLL_INTERVAL", defaults.poll_interval_secs),
            max_upload_wait_secs: env_or("GEMINI_MAX_UPLOAD_WAIT", defaults.max_upload_wait_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Validate)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    #[validate(range(min = 1, max = 64))]
    pub max_concurrent_jobs: usize,
    /// Jobs allowed to wait for a free slot
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    /// Seconds between retention sweeps
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
    /// Age in seconds after which a job is deleted
    #[validate(range(min = 1))]
    pub retention_secs: u64,
    /// Expected processing seconds per second of video
    #[validate(range(min = 0.01, max = 100.0))]
    pub processing_factor: f64,
    /// Time budget for assembling one output video
    #[validate(range(min = 1))]
    pub ffmpeg_timeout_secs: u64,
    /// Whether GPU encoding may be attempted
    pub use_gpu: bool,
    /// GPU family to detect
    pub gpu_type: GpuPreference,
    /// Share of free GPU memory to budget
    #[validate(range(min = 0.05, max = 1.0))]
    pub gpu_memory_safety_factor: f64,
    /// Segment locator settings
    #[validate(nested)]
    pub gemini: GeminiConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_capacity: 64,
            cleanup_interval_secs: 3600,
            retention_secs: 86_400,
            processing_factor: 1.5,
            ffmpeg_timeout_secs: 600,
            use_gpu: true,
            gpu_type: GpuPreference::Auto,
            gpu_memory_safety_factor: 0.7,
            gemini: GeminiConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables and validate it.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let gpu_type = match std::env::var("FORCE_GPU_TYPE") {
            Ok(value) => value
                .parse::<GpuPreference>()
                .map_err(|e| WorkerError::config_error(format!("FORCE_GPU_TYPE: {}", e)))?,
            Err(_) => defaults.gpu_type,
        };

        let config = Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs),
            queue_capacity: env_or("WORKER_QUEUE_CAPACITY", defaults.queue_capacity),
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval_secs),
            retention_secs: env_or("RETENTION_SECS", defaults.retention_secs),
            processing_factor: env_or("AVG_PROCESSING_FACTOR", defaults.processing_factor),
            ffmpeg_timeout_secs: env_or("FFMPEG_TIMEOUT", defaults.ffmpeg_timeout_secs),
            use_gpu: std::env::var("USE_GPU")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(defaults.use_gpu),
            gpu_type,
            gpu_memory_safety_factor: env_or(
                "GPU_MEMORY_SAFETY_FACTOR",
                defaults.gpu_memory_safety_factor,
            ),
            gemini: GeminiConfig::from_env(),
        };

        config.check()?;
        Ok(config)
    }

    /// Validate ranges.
    pub fn check(&self) -> WorkerResult<()> {
        self.validate()
            .map_err(|e| WorkerError::config_error(e.to_string()))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg_timeout_secs)
    }

    /// Settings for GPU detection.
    pub fn hardware(&self) -> HardwareConfig {
        HardwareConfig {
            use_gpu: self.use_gpu && self.gpu_type != GpuPreference::None,
            preference: self.gpu_type,
            memory_safety_factor: self.gpu_memory_safety_factor,
        }
    }
}

/// Read and parse an environment variable, falling back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
