//! Per-clip caption sub-pipeline.
//!
//! For each extracted clip: transcribe, render an SRT track, burn it in and
//! finish through the shorts encoding profile. Any failure along the way
//! switches to the fallback, which finishes the raw clip through the same
//! profile without captions. [`CaptionPipeline::process_clip`] therefore
//! always yields a [`ClipResult`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use vshort_media::fs_utils::copy_file;
use vshort_media::subtitles::{burn_command, write_srt};
use vshort_media::{FfmpegCommand, MediaError, MediaTool, RunLimits, SubtitleStyle, Transcriber};
use vshort_models::{ClipResult, ClipStatus, ClipWindow, EncodingConfig};

use crate::error::{CaptionStep, WorkerError};

/// Limits for the two kinds of external call a clip makes.
#[derive(Debug, Clone, Default)]
pub struct CaptionLimits {
    pub transcribe: RunLimits,
    pub encode: RunLimits,
}

/// Output locations for one clip, all under the session's output area.
#[derive(Debug, Clone)]
pub struct ClipOutputs {
    pub srt: PathBuf,
    pub captioned: PathBuf,
    pub finished: PathBuf,
    pub fallback: PathBuf,
}

impl ClipOutputs {
    pub fn new(clip: &Path, output_dir: &Path) -> Self {
        let stem = clip
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        Self {
            srt: output_dir.join(format!("{}.srt", stem)),
            captioned: output_dir.join(format!("{}_captioned.mp4", stem)),
            finished: output_dir.join(format!("{}_final.mp4", stem)),
            fallback: output_dir.join(format!("{}_nocaptions.mp4", stem)),
        }
    }
}

pub struct CaptionPipeline {
    tool: Arc<dyn MediaTool>,
    transcriber: Arc<dyn Transcriber>,
    /// Captured once at construction
    transcriber_available: bool,
    model: Option<String>,
    style: SubtitleStyle,
    encoding: EncodingConfig,
}

impl CaptionPipeline {
    pub fn new(
        tool: Arc<dyn MediaTool>,
        transcriber: Arc<dyn Transcriber>,
        model: Option<String>,
    ) -> Self {
        let transcriber_available = transcriber.is_available();
        Self {
            tool,
            transcriber,
            transcriber_available,
            model,
            style: SubtitleStyle::default(),
            encoding: EncodingConfig::for_shorts(),
        }
    }

    pub fn captions_enabled(&self) -> bool {
        self.transcriber_available
    }

    /// Produce the finished clip for `window`.
    pub async fn process_clip(
        &self,
        window: ClipWindow,
        clip: &Path,
        output_dir: &Path,
        limits: &CaptionLimits,
    ) -> ClipResult {
        let outputs = ClipOutputs::new(clip, output_dir);

        match self.caption(clip, &outputs, limits).await {
            Ok(()) => {
                debug!(clip_index = window.index, "Captioned {}", outputs.finished.display());
                ClipResult {
                    window,
                    path: outputs.finished,
                    status: ClipStatus::Captioned,
                }
            }
            Err(e) => {
                warn!(clip_index = window.index, "Captioning skipped: {}", e);
                let path = self.fallback(clip, &outputs, limits).await;
                ClipResult {
                    window,
                    path,
                    status: ClipStatus::FallbackNoCaptions,
                }
            }
        }
    }

    async fn caption(
        &self,
        clip: &Path,
        outputs: &ClipOutputs,
        limits: &CaptionLimits,
    ) -> Result<(), WorkerError> {
        if !self.transcriber_available {
            return Err(WorkerError::caption(
                CaptionStep::Transcribe,
                MediaError::TranscriptionUnavailable,
            ));
        }

        let segments = self
            .transcriber
            .transcribe(clip, self.model.as_deref(), &limits.transcribe)
            .await
            .map_err(|e| WorkerError::caption(CaptionStep::Transcribe, e))?;

        write_srt(&segments, &outputs.srt)
            .await
            .map_err(|e| WorkerError::caption(CaptionStep::RenderTrack, e))?;

        let burn = burn_command(clip, &outputs.srt, &outputs.captioned, &self.style);
        self.tool
            .execute(&burn, &limits.encode)
            .await
            .map_err(|e| WorkerError::caption(CaptionStep::Overlay, e))?;

        let finish = self.finish_command(&outputs.captioned, &outputs.finished);
        self.tool
            .execute(&finish, &limits.encode)
            .await
            .map_err(|e| WorkerError::caption(CaptionStep::Finalize, e))?;

        Ok(())
    }

    /// Finish without captions. Falls back to a plain copy of the clip, and
    /// to the clip itself when even that fails.
    async fn fallback(&self, clip: &Path, outputs: &ClipOutputs, limits: &CaptionLimits) -> PathBuf {
        let cmd = self.finish_command(clip, &outputs.fallback);
        match self.tool.execute(&cmd, &limits.encode).await {
            Ok(()) => return outputs.fallback.clone(),
            Err(e) => warn!("Fallback encode failed for {}: {}", clip.display(), e),
        }

        match copy_file(clip, &outputs.fallback).await {
            Ok(()) => outputs.fallback.clone(),
            Err(e) => {
                warn!("Fallback copy failed for {}: {}", clip.display(), e);
                clip.to_path_buf()
            }
        }
    }

    fn finish_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output);
        if let Some(filter) = self.encoding.output_filter() {
            cmd = cmd.video_filter(filter);
        }
        cmd.encoding(&self.encoding)
    }
}
