//! FFmpeg invocation.
//!
//! [`FfmpegCommand`] assembles an argument list; [`FfmpegRunner`] executes it
//! against a shared deadline so that several invocations belonging to one
//! operation split a single time budget.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Arguments for one FFmpeg run.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Placed before `-i`
    pre_input: Vec<String>,
    /// Placed between the input and the output
    post_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            pre_input: Vec::new(),
            post_input: Vec::new(),
        }
    }

    /// Append arguments that apply to the input.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append arguments that apply to the output.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_input.extend(args.into_iter().map(Into::into));
        self
    }

    /// Start reading the input at `seconds`.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_args(["-ss".to_string(), format!("{:.3}", seconds)])
    }

    /// Read `seconds` of the input.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_args(["-t".to_string(), format!("{:.3}", seconds)])
    }

    pub fn audio_codec(self, codec: &str) -> Self {
        self.output_args(["-c:a", codec])
    }

    /// Copy every stream as-is.
    pub fn codec_copy(self) -> Self {
        self.output_args(["-c", "copy"])
    }

    /// Treat the input as an ffconcat list of absolute paths.
    pub fn concat_input(self) -> Self {
        self.input_args(["-f", "concat", "-safe", "0"])
    }

    /// Full argument list, excluding the program name.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.pre_input.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.post_input.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Executes FFmpeg commands, killing any run that outlives the deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegRunner {
    deadline: Option<Instant>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run must finish before `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `cmd` to completion.
    ///
    /// A non-zero exit becomes [`MediaError::FfmpegFailed`] carrying the tail
    /// of stderr; reaching the deadline kills the process and returns
    /// [`MediaError::Timeout`].
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let ffmpeg = check_ffmpeg()?;
        let args = cmd.build_args();
        debug!("ffmpeg {}", args.join(" "));
        self.run_program(&ffmpeg, &args).await
    }

    async fn run_program(&self, program: &Path, args: &[String]) -> MediaResult<()> {
        let budget = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(MediaError::Timeout(0));
                }
                Some(remaining)
            }
            None => None,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(collect_tail(stderr)));

        let status = match budget {
            Some(budget) => match tokio::time::timeout(budget, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(program = %program.display(), "Process exceeded its {}s budget, killing it", budget.as_secs());
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(budget.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            return Ok(());
        }

        let stderr = match stderr_tail {
            Some(handle) => handle.await.ok().filter(|s| !s.is_empty()),
            None => None,
        };
        Err(MediaError::ffmpeg_failed(
            format!("FFmpeg exited with {}", status),
            stderr,
            status.code(),
        ))
    }
}

/// Runs FFmpeg commands on behalf of the assembler.
#[async_trait]
pub trait FfmpegExecutor: Send + Sync + fmt::Debug {
    /// Run `cmd`, failing with [`MediaError::Timeout`] once `deadline` passes.
    async fn execute(&self, cmd: &FfmpegCommand, deadline: Instant) -> MediaResult<()>;
}

#[async_trait]
impl FfmpegExecutor for FfmpegRunner {
    async fn execute(&self, cmd: &FfmpegCommand, deadline: Instant) -> MediaResult<()> {
        self.with_deadline(deadline).run(cmd).await
    }
}

/// Read stderr to the end, keeping the last lines.
async fn collect_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Locate the `ffmpeg` binary.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate the `ffprobe` binary.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cut_command_args() {
        let args = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .output_args(["-c:v", "libx264"])
            .audio_codec("aac")
            .build_args();

        assert_eq!(&args[..4], &["-y", "-v", "error", "-nostdin"]);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "10.000");
        assert!(args.contains(&"30.000".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_input_args_precede_input() {
        let args = FfmpegCommand::new("list.txt", "out.mp4")
            .concat_input()
            .codec_copy()
            .build_args();

        let concat = args.iter().position(|a| a == "concat").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let copy = args.iter().position(|a| a == "copy").unwrap();
        assert!(concat < input);
        assert!(input < copy);
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_before_spawning() {
        let runner = FfmpegRunner::new().with_deadline(Instant::now() - Duration::from_secs(1));
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::Timeout(0))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_killed_at_deadline() {
        let runner = FfmpegRunner::new().with_deadline(Instant::now() + Duration::from_millis(200));
        let started = std::time::Instant::now();

        let result = runner
            .run_program(Path::new("sleep"), &["30".to_string()])
            .await;

        assert!(matches!(result, Err(MediaError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_process_reports_exit() {
        let runner = FfmpegRunner::new();
        let result = runner.run_program(Path::new("false"), &[]).await;

        assert!(matches!(result, Err(MediaError::FfmpegFailed { exit_code: Some(1), .. })));
    }
}
