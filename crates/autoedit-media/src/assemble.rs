//! Cut-and-concatenate assembly of kept segments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegExecutor, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::hardware::{EncoderProfile, HardwareInfo};

/// A time range of the source to keep, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutRange {
    pub start: f64,
    pub end: f64,
}

impl CutRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Produces one output video from ordered cuts of a source video.
#[async_trait]
pub trait MediaAssembler: Send + Sync {
    /// Write the concatenation of `cuts` from `source` to `output`.
    ///
    /// On error no file is left at `output`.
    async fn assemble(&self, source: &Path, cuts: &[CutRange], output: &Path) -> MediaResult<()>;
}

/// FFmpeg-backed assembler with an optional accelerated first attempt.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    accelerated: Option<EncoderProfile>,
    software: EncoderProfile,
    timeout: Duration,
    executor: Arc<dyn FfmpegExecutor>,
}

impl FfmpegAssembler {
    /// Create an assembler for the detected hardware.
    pub fn new(hardware: &HardwareInfo, timeout: Duration) -> Self {
        Self {
            accelerated: EncoderProfile::accelerated(hardware),
            software: EncoderProfile::software(),
            timeout,
            executor: Arc::new(FfmpegRunner::new()),
        }
    }

    /// Run commands through `executor` instead of spawning FFmpeg directly.
    pub fn with_executor(mut self, executor: Arc<dyn FfmpegExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Name of the encoder tried first.
    pub fn preferred_encoder(&self) -> &'static str {
        self.accelerated
            .as_ref()
            .map(|p| p.name)
            .unwrap_or(self.software.name)
    }

    /// One full cut-and-join pass within the time budget.
    async fn attempt(
        &self,
        profile: &EncoderProfile,
        source: &Path,
        cuts: &[CutRange],
        output: &Path,
    ) -> MediaResult<()> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let scratch = tempfile::Builder::new()
            .prefix(".segments-")
            .tempdir_in(parent)?;

        let mut segment_paths = Vec::with_capacity(cuts.len());
        for (index, cut) in cuts.iter().enumerate() {
            let segment_path = scratch.path().join(format!("segment_{:04}.mp4", index));
            let cmd = FfmpegCommand::new(source, &segment_path)
                .input_args(profile.input_args.iter().cloned())
                .seek(cut.start)
                .duration(cut.duration())
                .output_args(profile.video_args.iter().cloned())
                .audio_codec("aac");
            self.executor.execute(&cmd, deadline).await?;
            segment_paths.push(segment_path);
        }

        let list_path = scratch.path().join("segments.txt");
        tokio::fs::write(&list_path, concat_list(&segment_paths)).await?;

        let cmd = FfmpegCommand::new(&list_path, output)
            .concat_input()
            .codec_copy();
        self.executor.execute(&cmd, deadline).await
    }
}

#[async_trait]
impl MediaAssembler for FfmpegAssembler {
    async fn assemble(&self, source: &Path, cuts: &[CutRange], output: &Path) -> MediaResult<()> {
        if cuts.is_empty() {
            return Err(MediaError::NoSegments);
        }

        if let Some(profile) = &self.accelerated {
            match self.attempt(profile, source, cuts, output).await {
                Ok(()) => {
                    info!(encoder = profile.name, segments = cuts.len(), "Assembled output video");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        encoder = profile.name,
                        "Accelerated encode failed, falling back to software: {}", e
                    );
                    discard_partial(output).await;
                }
            }
        }

        match self.attempt(&self.software, source, cuts, output).await {
            Ok(()) => {
                info!(encoder = self.software.name, segments = cuts.len(), "Assembled output video");
                Ok(())
            }
            Err(e) => {
                discard_partial(output).await;
                Err(e)
            }
        }
    }
}

async fn discard_partial(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %output.display(), "Failed to remove partial output: {}", e);
        }
    }
}

/// Build an ffconcat list for the given segment files.
fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}
