//! Video editing worker.
//!
//! This crate provides:
//! - Script extraction from text, PDF and DOCX uploads
//! - Segment location through Gemini and segment normalization
//! - The job engine driving each job to a terminal state
//! - A bounded worker pool and the retention sweeper

pub mod config;
pub mod error;
pub mod executor;
pub mod gemini;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod script;
pub mod segments;
pub mod sweeper;

pub use config::{GeminiConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use gemini::GeminiLocator;
pub use locator::{LocateRequest, LocatorOutput, RawSegment, SegmentLocator};
pub use logging::JobLogger;
pub use processor::{estimate_processing_seconds, JobEngine, TOTAL_STEPS};
pub use script::{extract_script, extract_script_blocking, ScriptFormat};
pub use segments::{normalize_segments, NormalizedSegments};
pub use sweeper::{RetentionSweeper, SweepReport};
