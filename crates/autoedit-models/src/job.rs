//! Editing job definition and lifecycle.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::progress::JobProgress;
use crate::segment::{DurationSummary, Segment};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker slot
    #[default]
    Queued,
    /// Job is actively being processed
    Processing,
    /// Output video is ready for download
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Results recorded when a job completes.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub output_path: PathBuf,
    pub segments: Vec<Segment>,
    pub analysis: String,
    pub duration: DurationSummary,
}

/// A video editing job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Private working directory holding inputs and output
    pub work_dir: PathBuf,

    /// Uploaded source video
    pub video_path: PathBuf,

    /// Uploaded script document, if the script was sent as a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,

    /// Resolved script text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_text: Option<String>,

    /// Creation timestamp, used for retention
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// Finished video, set only on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Failure reason, set only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Progress while processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,

    /// Kept segments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,

    /// Model commentary on how the video matched the script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,

    /// Source and output durations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSummary>,

    /// Percentage of the source that was cut away
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduction_percentage: Option<f64>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        id: JobId,
        work_dir: impl Into<PathBuf>,
        video_path: impl Into<PathBuf>,
        script_path: Option<PathBuf>,
        script_text: Option<String>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            work_dir: work_dir.into(),
            video_path: video_path.into(),
            script_path,
            script_text,
            created_at: Utc::now(),
            output_path: None,
            error: None,
            progress: None,
            segments: Vec::new(),
            analysis: None,
            duration: None,
            reduction_percentage: None,
        }
    }

    /// Move from `queued` to `processing`.
    pub fn start(&mut self, total_steps: u32, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure(JobStatus::Queued, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.progress = Some(JobProgress::new(total_steps, now));
        Ok(())
    }

    /// Record a checkpoint while processing.
    pub fn record_progress(
        &mut self,
        step: u32,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.progress
            .get_or_insert_with(|| JobProgress::new(1, now))
            .advance(step, message, now);
        Ok(())
    }

    /// Set the script text. Has no effect once the text is known.
    pub fn resolve_script(&mut self, text: String) -> bool {
        if self.script_text.is_some() {
            return false;
        }
        self.script_text = Some(text);
        true
    }

    /// Move from `processing` to `completed`.
    pub fn complete(&mut self, outcome: JobOutcome) -> Result<(), TransitionError> {
        self.ensure(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.output_path = Some(outcome.output_path);
        self.reduction_percentage = outcome.duration.reduction_percentage();
        self.duration = Some(outcome.duration);
        self.segments = outcome.segments;
        self.analysis = Some(outcome.analysis);
        self.finish_progress("Processing complete!");
        Ok(())
    }

    /// Move to `failed`. Allowed from any non-terminal state.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        let error = error.into();
        self.status = JobStatus::Failed;
        self.output_path = None;
        self.finish_progress(format!("Error: {}", error));
        self.error = Some(error);
        Ok(())
    }

    fn ensure(&self, from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == from {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    fn finish_progress(&mut self, message: impl Into<String>) {
        let start = self.progress.as_ref().map(|p| p.start_time).unwrap_or_else(Utc::now);
        self.progress
            .get_or_insert_with(|| JobProgress::new(1, start))
            .finish(message);
    }
}
