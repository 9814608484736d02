//! Per-job log context.

use std::fmt::Display;

use tracing::{error, info, info_span, warn, Span};

use autoedit_models::JobId;

/// Logs job lifecycle events with the job id attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    span: Span,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        let job_id = job_id.to_string();
        let span = info_span!("job", job_id = %job_id);
        Self { job_id, span }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span that processing of this job runs in.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn started(&self) {
        info!(job_id = %self.job_id, "Processing video");
    }

    pub fn step(&self, step: u32, total: u32, message: &str) {
        info!(job_id = %self.job_id, step, total, "{}", message);
    }

    pub fn warn(&self, message: impl Display) {
        warn!(job_id = %self.job_id, "{}", message);
    }

    pub fn failed(&self, reason: &str) {
        error!(job_id = %self.job_id, reason, "Job failed");
    }

    pub fn completed(&self, elapsed_secs: f64, segments: usize) {
        info!(job_id = %self.job_id, elapsed_secs, segments, "Job completed");
    }
}
