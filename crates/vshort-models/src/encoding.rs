//! Video encoding profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Frame rate of finished clips
pub const SHORTS_FPS: u32 = 30;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    pub codec: String,

    /// Encoding preset (e.g., "fast", "medium")
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    pub crf: u8,

    /// H.264 profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// H.264 level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Output frame rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,

    /// Output pixel format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,

    /// Audio codec
    pub audio_codec: String,

    /// Audio bitrate
    pub audio_bitrate: String,

    /// Move the moov atom to the front for streaming playback
    #[serde(default)]
    pub faststart: bool,

    /// Additional FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self::for_reframe()
    }
}

impl EncodingConfig {
    /// Profile for the reframing pass that produces the vertical master.
    pub fn for_reframe() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: "medium".to_string(),
            crf: 23,
            profile: None,
            level: None,
            fps: None,
            pixel_format: None,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            faststart: true,
            extra_args: Vec::new(),
        }
    }

    /// Final platform profile shared by captioned and fallback clips.
    pub fn for_shorts() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: "fast".to_string(),
            crf: 21,
            profile: Some("main".to_string()),
            level: Some("3.1".to_string()),
            fps: Some(SHORTS_FPS),
            pixel_format: Some("yuv420p".to_string()),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            faststart: true,
            extra_args: vec!["-max_muxing_queue_size".to_string(), "1024".to_string()],
        }
    }

    /// Filter chain implied by the profile (`fps=..,format=..`), if any.
    pub fn output_filter(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(fps) = self.fps {
            parts.push(format!("fps={}", fps));
        }
        if let Some(fmt) = &self.pixel_format {
            parts.push(format!("format={}", fmt));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }

    /// Convert to FFmpeg output arguments (codec, quality, audio, muxing).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec.clone()];

        if let Some(profile) = &self.profile {
            args.extend_from_slice(&["-profile:v".to_string(), profile.clone()]);
        }
        if let Some(level) = &self.level {
            args.extend_from_slice(&["-level".to_string(), level.clone()]);
        }

        args.extend_from_slice(&[
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]);

        if self.faststart {
            args.extend_from_slice(&["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.extend(self.extra_args.clone());

        args
    }
}
