//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;

use validator::Validate;

use crate::error::{ApiError, ApiResult};

/// Default upload limit: 500 MiB.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 500 * 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone, Validate)]
pub struct ApiConfig {
    /// Server host
    #[validate(length(min = 1))]
    pub host: String,
    /// Server port
    #[validate(range(min = 1))]
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    #[validate(range(min = 1))]
    pub rate_limit_rps: u32,
    /// Max request body size
    #[validate(range(min = 1024))]
    pub max_content_length: usize,
    /// Root of the per-job working directories
    pub upload_folder: PathBuf,
    /// Job table snapshot
    pub jobs_data_file: PathBuf,
    /// Environment (development/production)
    pub environment: String,
    /// Serve Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`.
    /// Only safe behind a reverse proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            upload_folder: PathBuf::from("uploads"),
            jobs_data_file: PathBuf::from("jobs_data.json"),
            environment: "development".to_string(),
            metrics_enabled: true,
            trust_proxy_headers: false,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables and validate it.
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let config = Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            max_content_length: env_or("MAX_CONTENT_LENGTH", defaults.max_content_length),
            upload_folder: std::env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_folder),
            jobs_data_file: std::env::var("JOBS_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.jobs_data_file),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
            trust_proxy_headers: std::env::var("TRUST_PROXY_HEADERS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.trust_proxy_headers),
        };

        config
            .validate()
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
