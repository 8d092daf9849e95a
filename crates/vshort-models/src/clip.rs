//! Clip windows and per-clip results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A planned time interval of the reframed master, before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipWindow {
    /// 1-based position in the output sequence
    pub index: u32,
    /// Start offset in seconds
    pub start: f64,
    /// Length in seconds
    pub length: f64,
}

impl ClipWindow {
    pub fn new(index: u32, start: f64, length: f64) -> Self {
        Self {
            index,
            start,
            length,
        }
    }

    /// End offset in seconds.
    pub fn end(&self) -> f64 {
        self.start + self.length
    }

    /// Segment filename: `{base}_part{NN}.{ext}`.
    ///
    /// `base` must already be sanitized.
    pub fn part_filename(&self, base: &str, ext: &str) -> String {
        format!("{}_part{:02}.{}", base, self.index, ext)
    }
}

/// Outcome of the caption sub-pipeline for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Captions were burned in
    Captioned,
    /// Captioning failed; the clip was finished without captions
    FallbackNoCaptions,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Captioned => "captioned",
            ClipStatus::FallbackNoCaptions => "fallback_no_captions",
        }
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal artifact for one clip window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipResult {
    pub window: ClipWindow,
    /// Finished clip on disk
    pub path: PathBuf,
    pub status: ClipStatus,
}

impl ClipResult {
    pub fn is_captioned(&self) -> bool {
        self.status == ClipStatus::Captioned
    }
}
