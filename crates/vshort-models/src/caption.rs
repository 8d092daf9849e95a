//! Timed caption text produced by transcription.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One timed line of caption text, relative to the start of its clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CaptionSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Caption text
    pub text: String,
}

impl CaptionSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Text with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// True when timing is finite, non-negative and ordered, and the text is not blank.
    pub fn is_well_formed(&self) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && self.start >= 0.0
            && self.start < self.end
            && !self.trimmed_text().is_empty()
    }
}
