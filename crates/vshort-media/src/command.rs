//! FFmpeg command builder and supervised process runner.
//!
//! Every external tool call goes through [`RunLimits`]: an optional timeout
//! and an optional cancellation signal. A call that hits either limit kills
//! its child process and returns [`MediaError::Timeout`] or
//! [`MediaError::Cancelled`]; a non-zero exit returns
//! [`MediaError::CommandFailed`] carrying the captured stderr. FFmpeg
//! progress is forwarded to [`RunLimits::progress`] when a receiver is set.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use vshort_models::EncodingConfig;

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Timeout and cancellation applied to one external invocation.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub timeout: Option<Duration>,
    pub cancel: Option<watch::Receiver<bool>>,
    /// Receives FFmpeg progress snapshots; full channels drop snapshots
    pub progress: Option<mpsc::Sender<FfmpegProgress>>,
}

impl RunLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel_rx);
        self
    }

    /// Forward FFmpeg progress to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<FfmpegProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Apply an encoding profile (codec, quality, audio, muxing flags).
    pub fn encoding(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        // Log level
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        // Input args
        args.extend(self.input_args.clone());

        // Input file
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        // Output args
        args.extend(self.output_args.clone());

        // Output file
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Executor for declarative FFmpeg transforms.
///
/// The pipeline only ever hands over a complete [`FfmpegCommand`]; how it is
/// executed (a real ffmpeg process, a test double) is up to the implementor.
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn execute(&self, cmd: &FfmpegCommand, limits: &RunLimits) -> MediaResult<()>;
}

/// [`MediaTool`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegTool;

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn execute(&self, cmd: &FfmpegCommand, limits: &RunLimits) -> MediaResult<()> {
        if let Some(parent) = cmd.output().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        FfmpegRunner::new().with_limits(limits.clone()).run(cmd).await
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    limits: RunLimits,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout and cancellation.
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        // Check FFmpeg exists
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));
        let started = Instant::now();

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;
        let stderr_handle = tokio::spawn(drain_stderr(stderr, self.limits.progress.clone()));

        let result = wait_supervised(&mut child, "ffmpeg", &self.limits).await;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        metrics::histogram!("vshort_command_duration_seconds", "program" => "ffmpeg")
            .record(started.elapsed().as_secs_f64());

        let status = result?;
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::command_failed(
                "ffmpeg",
                "exited with non-zero status",
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            ))
        }
    }
}

/// Read FFmpeg's stderr to the end. Progress lines go to `progress`; the
/// last [`STDERR_TAIL_LINES`] other lines are returned for error reports.
async fn drain_stderr<R>(stderr: R, progress: Option<mpsc::Sender<FfmpegProgress>>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr).lines();
    let mut current = FfmpegProgress::default();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = reader.next_line().await {
        if is_progress_line(&line) {
            if let (Some(snapshot), Some(tx)) = (parse_progress_line(&line, &mut current), &progress)
            {
                let _ = tx.try_send(snapshot);
            }
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a program to completion under `limits`, capturing stdout and stderr.
///
/// A non-zero exit is an error carrying the captured stderr.
pub async fn run_captured(
    program: &Path,
    args: &[String],
    limits: &RunLimits,
) -> MediaResult<ProcessOutput> {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    debug!("Running: {} {}", name, args.join(" "));
    let started = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout_handle = spawn_reader(child.stdout.take());
    let stderr_handle = spawn_reader(child.stderr.take());

    let result = wait_supervised(&mut child, &name, limits).await;

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();

    metrics::histogram!("vshort_command_duration_seconds", "program" => name.clone())
        .record(started.elapsed().as_secs_f64());

    let status = result?;
    if !status.success() {
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("exited with non-zero status")
            .to_string();
        return Err(MediaError::command_failed(
            name,
            message,
            Some(stderr),
            status.code(),
        ));
    }

    Ok(ProcessOutput { stdout, stderr })
}

fn spawn_reader<R>(stream: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Wait for child process with cancellation and timeout.
async fn wait_supervised(
    child: &mut Child,
    program: &str,
    limits: &RunLimits,
) -> MediaResult<ExitStatus> {
    if limits.is_cancelled() {
        let _ = child.kill().await;
        return Err(MediaError::Cancelled);
    }

    let timeout = limits.timeout;
    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status),
        _ = deadline => WaitOutcome::TimedOut,
        _ = cancelled(limits.cancel.clone()) => WaitOutcome::Cancelled,
    };

    match outcome {
        WaitOutcome::Exited(status) => Ok(status?),
        WaitOutcome::TimedOut => {
            let secs = timeout.map(|d| d.as_secs()).unwrap_or_default();
            warn!("{} timed out after {} seconds, killing process", program, secs);
            let _ = child.kill().await;
            Err(MediaError::Timeout(secs))
        }
        WaitOutcome::Cancelled => {
            info!("{} cancelled, killing process", program);
            let _ = child.kill().await;
            Err(MediaError::Cancelled)
        }
    }
}

/// Resolves once the cancel flag turns true. Never resolves without a signal.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Keys emitted by `-progress`.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

fn is_progress_line(line: &str) -> bool {
    line.trim()
        .split_once('=')
        .map(|(key, _)| PROGRESS_KEYS.contains(&key))
        .unwrap_or(false)
}

/// Parse a progress line from FFmpeg's -progress output.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            "out_time_ms" | "out_time_us" => {
                // Both keys are reported in microseconds by current ffmpeg builds
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                // Format: HH:MM:SS.microseconds
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value
                    .strip_suffix('x')
                    .and_then(|s| s.trim().parse().ok())
                {
                    current.speed = speed;
                }
            }
            "progress" => {
                // "continue" or "end"
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}
