//! Job progress tracking.
//!
//! Progress is reported as a percentage derived from discrete checkpoints,
//! plus an ETA extrapolated from the elapsed time.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Highest percentage reported while a job is still running.
pub const MAX_RUNNING_PERCENT: u8 = 95;

/// Progress snapshot for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobProgress {
    /// Completion percentage (0-95 while running, 100 once terminal)
    pub percent: u8,
    /// Last checkpoint reached
    pub current_step: u32,
    /// Number of checkpoints in the pipeline
    pub total_steps: u32,
    /// Human-readable description of the current step
    pub message: String,
    /// When processing started
    pub start_time: DateTime<Utc>,
    /// Estimated seconds until completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<u64>,
    /// ETA formatted for display (e.g. "2m 5s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_remaining_time: Option<String>,
}

impl JobProgress {
    /// Create progress for a job that just started.
    pub fn new(total_steps: u32, start_time: DateTime<Utc>) -> Self {
        Self {
            percent: 0,
            current_step: 0,
            total_steps: total_steps.max(1),
            message: "Starting".to_string(),
            start_time,
            estimated_remaining_seconds: None,
            formatted_remaining_time: None,
        }
    }

    /// Record a checkpoint.
    ///
    /// The percentage never decreases and never exceeds [`MAX_RUNNING_PERCENT`].
    pub fn advance(&mut self, step: u32, message: impl Into<String>, now: DateTime<Utc>) {
        let step = step.min(self.total_steps);
        let computed = (100 * step / self.total_steps).min(MAX_RUNNING_PERCENT as u32) as u8;

        self.current_step = self.current_step.max(step);
        self.percent = self.percent.max(computed);
        self.message = message.into();

        match estimate_remaining(self.start_time, now, self.percent) {
            Some(remaining) => {
                self.estimated_remaining_seconds = Some(remaining);
                self.formatted_remaining_time = Some(format_remaining(remaining));
            }
            None => {
                self.estimated_remaining_seconds = None;
                self.formatted_remaining_time = None;
            }
        }
    }

    /// Force progress to 100% when the job leaves `processing`.
    pub fn finish(&mut self, message: impl Into<String>) {
        self.percent = 100;
        self.current_step = self.total_steps;
        self.message = message.into();
        self.estimated_remaining_seconds = Some(0);
        self.formatted_remaining_time = Some(format_remaining(0));
    }
}

/// Extrapolate remaining seconds from elapsed time and percentage.
///
/// Returns `None` while nothing has been done yet.
pub fn estimate_remaining(start: DateTime<Utc>, now: DateTime<Utc>, percent: u8) -> Option<u64> {
    if percent == 0 {
        return None;
    }

    let elapsed = (now - start).num_milliseconds().max(0) as f64 / 1000.0;
    let total = elapsed / (percent as f64 / 100.0);
    Some((total - elapsed).max(0.0) as u64)
}

/// Format a number of seconds as "{h}h {m}m", "{m}m {s}s" or "{s}s".
pub fn format_remaining(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
