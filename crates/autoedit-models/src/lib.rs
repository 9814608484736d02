//! Shared data models for the AutoEdit backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle transitions
//! - Progress tracking with ETA estimation
//! - Kept segments and duration summaries

pub mod job;
pub mod progress;
pub mod segment;

// Re-export common types
pub use job::{Job, JobId, JobOutcome, JobStatus, TransitionError};
pub use progress::{format_remaining, JobProgress};
pub use segment::{DurationSummary, Segment};
