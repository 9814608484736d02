//! Job metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "autoedit_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "autoedit_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "autoedit_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "autoedit_job_duration_seconds";
    pub const JOBS_SWEPT_TOTAL: &str = "autoedit_jobs_swept_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_failed() {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
}

pub fn record_jobs_swept(count: usize) {
    counter!(names::JOBS_SWEPT_TOTAL).increment(count as u64);
}
