//! Worker error types.

use autoedit_media::MediaError;
use autoedit_models::TransitionError;
use autoedit_store::StoreError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Script extraction failed: {0}")]
    ScriptExtraction(String),

    #[error("Unsupported script format: {0}")]
    UnsupportedScript(String),

    #[error("AI analysis failed: {0}")]
    AiFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job queue is full")]
    QueueFull,

    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Invalid job state: {0}")]
    Transition(#[from] TransitionError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn script_extraction(msg: impl Into<String>) -> Self {
        Self::ScriptExtraction(msg.into())
    }

    pub fn ai_failed(msg: impl Into<String>) -> Self {
        Self::AiFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error was caused by the uploaded input rather than the system.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            WorkerError::ScriptExtraction(_) | WorkerError::UnsupportedScript(_)
        )
    }
}
