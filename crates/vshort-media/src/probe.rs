//! FFprobe source inspection.
//!
//! The probe is the only place media properties are read from a file; every
//! later decision works from the returned [`SourceVideo`].

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use vshort_models::SourceVideo;

use crate::command::{check_ffprobe, run_captured, RunLimits};
use crate::error::{MediaError, MediaResult};

/// Inspects a media file and reports its geometry, duration and size.
#[async_trait]
pub trait SourceProber: Send + Sync {
    async fn probe(&self, path: &Path, limits: &RunLimits) -> MediaResult<SourceVideo>;
}

/// [`SourceProber`] backed by the `ffprobe` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfprobeProber;

#[async_trait]
impl SourceProber for FfprobeProber {
    async fn probe(&self, path: &Path, limits: &RunLimits) -> MediaResult<SourceVideo> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;

        let ffprobe = check_ffprobe()?;
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            path.to_string_lossy().to_string(),
        ];

        let output = run_captured(&ffprobe, &args, limits).await?;
        let video = parse_probe_output(path, output.stdout.as_bytes(), metadata.len())?;

        debug!(
            "Probed {}: {:.2}s {}x{} {} bytes",
            path.display(),
            video.duration,
            video.width,
            video.height,
            video.size_bytes
        );
        Ok(video)
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Build a [`SourceVideo`] from ffprobe's JSON output.
///
/// `fallback_size` is used when the container does not report its size.
pub fn parse_probe_output(
    path: &Path,
    json: &[u8],
    fallback_size: u64,
) -> MediaResult<SourceVideo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    if probe.streams.is_empty() {
        return Err(MediaError::invalid_video("file has no streams"));
    }

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let (width, height) = match (video_stream.width, video_stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::invalid_video("video stream has no dimensions")),
    };

    // Container duration first, stream duration as a fallback
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| parse_duration(f.duration.as_deref()))
        .or_else(|| parse_duration(video_stream.duration.as_deref()))
        .ok_or_else(|| MediaError::invalid_video("duration could not be determined"))?;

    let size_bytes = probe
        .format
        .as_ref()
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(fallback_size);

    Ok(SourceVideo {
        path: path.to_path_buf(),
        duration,
        width,
        height,
        size_bytes,
    })
}

/// ffprobe reports durations as decimal strings, or `N/A` when unknown.
fn parse_duration(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}
