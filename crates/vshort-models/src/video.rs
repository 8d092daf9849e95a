//! Probed source video and the limits applied to it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ValidationError, ValidationResult};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Default maximum source size (500MB).
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 500 * 1024 * 1024;
/// Default maximum source duration (1 hour).
pub const DEFAULT_MAX_SOURCE_DURATION_SECS: f64 = 3600.0;
/// Default maximum clip duration.
pub const DEFAULT_MAX_CLIP_SECONDS: f64 = 50.0;

/// Immutable record of a probed media file.
///
/// Produced once by the source probe and read-only afterwards. Every
/// downstream decision (validation, reframing, segmentation) reads from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceVideo {
    /// Location of the probed file
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// File size in bytes
    pub size_bytes: u64,
}

impl SourceVideo {
    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// File stem used to derive output names.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }
}

/// Externally configurable limits, enforced before any transform work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationLimits {
    /// Maximum source size in bytes
    pub max_source_bytes: u64,
    /// Maximum source duration in seconds
    pub max_source_duration: f64,
    /// Maximum length of a single output clip in seconds
    pub max_clip_seconds: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_source_duration: DEFAULT_MAX_SOURCE_DURATION_SECS,
            max_clip_seconds: DEFAULT_MAX_CLIP_SECONDS,
        }
    }
}

impl ValidationLimits {
    /// Check a byte size against the size limit.
    ///
    /// Split out so callers can reject oversized files before probing them.
    pub fn check_size(&self, size_bytes: u64) -> ValidationResult<()> {
        if size_bytes > self.max_source_bytes {
            return Err(ValidationError::FileTooLarge {
                actual_mb: size_bytes as f64 / BYTES_PER_MB,
                max_mb: self.max_source_bytes as f64 / BYTES_PER_MB,
            });
        }
        Ok(())
    }

    /// Check a probed source against size and duration limits.
    pub fn check(&self, video: &SourceVideo) -> ValidationResult<()> {
        self.check_size(video.size_bytes)?;

        if video.duration > self.max_source_duration {
            return Err(ValidationError::TooLong {
                actual: video.duration,
                max: self.max_source_duration,
            });
        }

        if !(video.duration > 0.0) {
            return Err(ValidationError::EmptyDuration);
        }

        Ok(())
    }
}
