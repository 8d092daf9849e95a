//! Speech recognition capability.
//!
//! Transcription is optional at runtime. [`detect_transcriber`] looks for the
//! `whisper` CLI once and returns either [`WhisperCli`] or [`Unavailable`],
//! which always reports the capability as missing.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use vshort_models::CaptionSegment;

use crate::command::{run_captured, RunLimits};
use crate::error::{MediaError, MediaResult};

/// Default Whisper model size.
pub const DEFAULT_WHISPER_MODEL: &str = "base";

/// Converts the audio of a media file into timed caption segments.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Whether the capability is installed.
    fn is_available(&self) -> bool;

    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Transcribe `media`. `model` selects a model size where supported.
    async fn transcribe(
        &self,
        media: &Path,
        model: Option<&str>,
        limits: &RunLimits,
    ) -> MediaResult<Vec<CaptionSegment>>;
}

/// Stand-in used when no speech recognition is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

#[async_trait]
impl Transcriber for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "unavailable"
    }

    async fn transcribe(
        &self,
        _media: &Path,
        _model: Option<&str>,
        _limits: &RunLimits,
    ) -> MediaResult<Vec<CaptionSegment>> {
        Err(MediaError::TranscriptionUnavailable)
    }
}

/// [`Transcriber`] backed by the openai-whisper command line tool.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    binary: PathBuf,
    default_model: String,
}

impl WhisperCli {
    pub fn new(binary: impl Into<PathBuf>, default_model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            default_model: default_model.into(),
        }
    }

    /// Locate `whisper` in PATH.
    pub fn detect(default_model: impl Into<String>) -> Option<Self> {
        which::which("whisper")
            .ok()
            .map(|binary| Self::new(binary, default_model))
    }

    fn build_args(media: &Path, model: &str, output_dir: &Path) -> Vec<String> {
        vec![
            media.to_string_lossy().to_string(),
            "--model".to_string(),
            model.to_string(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            output_dir.to_string_lossy().to_string(),
            "--fp16".to_string(),
            "False".to_string(),
            "--verbose".to_string(),
            "False".to_string(),
        ]
    }
}

#[async_trait]
impl Transcriber for WhisperCli {
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(
        &self,
        media: &Path,
        model: Option<&str>,
        limits: &RunLimits,
    ) -> MediaResult<Vec<CaptionSegment>> {
        let model = model.unwrap_or(&self.default_model);
        let out_dir = tempfile::TempDir::new()?;
        let args = Self::build_args(media, model, out_dir.path());

        debug!("Transcribing {} with whisper model {}", media.display(), model);
        run_captured(&self.binary, &args, limits)
            .await
            .map_err(|e| match e {
                MediaError::Timeout(_) | MediaError::Cancelled => e,
                other => MediaError::TranscriptionFailed(other.to_string()),
            })?;

        let stem = media
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json_path = out_dir.path().join(format!("{}.json", stem));
        let bytes = tokio::fs::read(&json_path).await.map_err(|e| {
            MediaError::TranscriptionFailed(format!(
                "missing transcript {}: {}",
                json_path.display(),
                e
            ))
        })?;

        parse_whisper_json(&bytes)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Parse the segment list of a Whisper JSON transcript.
pub fn parse_whisper_json(bytes: &[u8]) -> MediaResult<Vec<CaptionSegment>> {
    let output: WhisperOutput = serde_json::from_slice(bytes)
        .map_err(|e| MediaError::TranscriptionFailed(format!("unreadable transcript: {}", e)))?;
    Ok(output
        .segments
        .into_iter()
        .map(|s| CaptionSegment::new(s.start, s.end, s.text))
        .collect())
}

/// Probe for an installed speech recognizer.
pub fn detect_transcriber(default_model: &str) -> Arc<dyn Transcriber> {
    match WhisperCli::detect(default_model) {
        Some(whisper) => {
            info!("Speech recognition available: {}", whisper.binary.display());
            Arc::new(whisper)
        }
        None => {
            info!("Speech recognition not installed, clips will not be captioned");
            Arc::new(Unavailable)
        }
    }
}
