//! Kept video segments and duration accounting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A validated time range of the source video to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Why the segment was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Whether the segment was widened to reach the minimum length
    #[serde(default)]
    pub padded: bool,
}

impl Segment {
    /// Create a segment without rationale.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            rationale: None,
            padded: false,
        }
    }

    /// Length of the segment in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Source and output durations of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DurationSummary {
    /// Source video duration in seconds
    pub original: f64,
    /// Sum of kept segment durations in seconds
    pub processed: f64,
}

impl DurationSummary {
    /// Build a summary from the source duration and the kept segments.
    pub fn from_segments(original: f64, segments: &[Segment]) -> Self {
        Self {
            original,
            processed: segments.iter().map(Segment::duration).sum(),
        }
    }

    /// Percentage of the source removed, rounded to one decimal.
    ///
    /// `None` when the source duration is unknown.
    pub fn reduction_percentage(&self) -> Option<f64> {
        if self.original <= 0.0 {
            return None;
        }
        let reduction = 100.0 * (1.0 - self.processed / self.original);
        Some((reduction * 10.0).round() / 10.0)
    }
}
