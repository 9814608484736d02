//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - FFmpeg command building and execution with deadlines
//! - Video probing via ffprobe
//! - GPU detection and encoder selection
//! - Segment cutting and concatenation with software fallback

pub mod assemble;
pub mod command;
pub mod error;
pub mod hardware;
pub mod probe;

pub use assemble::{CutRange, FfmpegAssembler, MediaAssembler};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegExecutor, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use hardware::{EncoderProfile, GpuPreference, GpuVendor, HardwareConfig, HardwareInfo};
pub use probe::{probe_video, FfprobeProber, VideoInfo, VideoProber};
