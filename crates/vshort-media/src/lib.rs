#![deny(unreachable_patterns)]
//! Media collaborators and pure planning for the VShort clip pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a supervised runner with
//!   timeout, cancellation and captured stderr
//! - Source probing via ffprobe
//! - Reframe strategy selection and filter graphs for the 9:16 canvas
//! - Time segmentation and stream-copy extraction
//! - SRT rendering and subtitle burn-in
//! - Optional speech recognition (whisper CLI) behind a capability trait
//! - Video download via yt-dlp

pub mod command;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod reframe;
pub mod segment;
pub mod subtitles;
pub mod transcribe;

pub use command::{
    check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner, FfmpegTool, MediaTool,
    RunLimits,
};
pub use download::{Downloader, YtDlpDownloader};
pub use error::{MediaError, MediaResult};
pub use probe::{FfprobeProber, SourceProber};
pub use progress::FfmpegProgress;
pub use reframe::{reframe_video, select, select_for_height, ReframeOutcome};
pub use segment::{extract_windows, segment};
pub use subtitles::{render_srt, SubtitleStyle};
pub use transcribe::{detect_transcriber, Transcriber, Unavailable, WhisperCli};
