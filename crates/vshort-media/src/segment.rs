//! Time segmentation of the reframed master.
//!
//! [`segment`] partitions a duration into contiguous windows no longer than
//! the configured maximum. [`extract_windows`] cuts those windows out with
//! stream copy, so actual clip lengths may drift from the nominal ones by up
//! to a keyframe interval.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use vshort_models::{ClipWindow, ValidationError, ValidationResult};

use crate::command::{FfmpegCommand, MediaTool, RunLimits};
use crate::error::MediaResult;
use crate::fs_utils::copy_file;

/// Trailing windows shorter than this are rounding residue and are dropped.
const MIN_WINDOW_SECONDS: f64 = 0.001;

/// Partition `total_duration` into windows of at most `max_clip_seconds`.
pub fn segment(total_duration: f64, max_clip_seconds: f64) -> ValidationResult<Vec<ClipWindow>> {
    if !(max_clip_seconds > 0.0) || !max_clip_seconds.is_finite() {
        return Err(ValidationError::InvalidClipLength(max_clip_seconds));
    }
    if !(total_duration > 0.0) || !total_duration.is_finite() {
        return Err(ValidationError::EmptyDuration);
    }

    if total_duration <= max_clip_seconds {
        return Ok(vec![ClipWindow::new(1, 0.0, total_duration)]);
    }

    let count = (total_duration / max_clip_seconds).ceil() as u32;
    let windows = (0..count)
        .map(|i| {
            let start = i as f64 * max_clip_seconds;
            let length = max_clip_seconds.min(total_duration - start);
            ClipWindow::new(i + 1, start, length)
        })
        .filter(|w| w.length >= MIN_WINDOW_SECONDS)
        .collect();

    Ok(windows)
}

/// Cut each window out of `master` into `clips_dir/{base}_partNN.mp4`.
///
/// A single window covering the whole master is a plain file copy.
pub async fn extract_windows(
    tool: &dyn MediaTool,
    master: &Path,
    clips_dir: &Path,
    base: &str,
    windows: &[ClipWindow],
    limits: &RunLimits,
) -> MediaResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(clips_dir).await?;

    if let [only] = windows {
        let dst = clips_dir.join(only.part_filename(base, "mp4"));
        debug!("Single window, copying master to {}", dst.display());
        copy_file(master, &dst).await?;
        return Ok(vec![dst]);
    }

    info!("Splitting {} into {} clips", master.display(), windows.len());

    let mut paths = Vec::with_capacity(windows.len());
    for window in windows {
        let dst = clips_dir.join(window.part_filename(base, "mp4"));
        let cmd = FfmpegCommand::new(master, &dst)
            .seek(window.start)
            .duration(window.length)
            .codec_copy()
            .output_args(["-avoid_negative_ts", "make_zero"]);
        tool.execute(&cmd, limits).await?;
        paths.push(dst);
    }

    Ok(paths)
}
