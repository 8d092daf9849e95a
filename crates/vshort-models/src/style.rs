//! Reframing strategies for the vertical canvas.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default output canvas height.
pub const DEFAULT_TARGET_HEIGHT: u32 = 1920;

/// Method used to fit a source frame into the 9:16 canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReframeStrategy {
    /// Centered vertical slice of a wide source
    CropCenter,
    /// Already-tall source scaled to width and padded
    PadLetterbox,
    /// Fit-to-width foreground over a blurred, canvas-filling background
    BlurredBackgroundOverlay,
}

impl ReframeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReframeStrategy::CropCenter => "crop_center",
            ReframeStrategy::PadLetterbox => "pad_letterbox",
            ReframeStrategy::BlurredBackgroundOverlay => "blurred_background_overlay",
        }
    }
}

impl fmt::Display for ReframeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strategy plus the canvas it renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ReframeDecision {
    pub strategy: ReframeStrategy,
    pub target_width: u32,
    pub target_height: u32,
}

impl ReframeDecision {
    /// Build a decision for a 9:16 canvas of the given height.
    ///
    /// Width is `height * 9 / 16`, rounded down to an even number so that
    /// yuv420p encoders accept it.
    pub fn for_height(strategy: ReframeStrategy, target_height: u32) -> Self {
        let target_width = (target_height as u64 * 9 / 16) as u32 & !1;
        Self {
            strategy,
            target_width,
            target_height,
        }
    }
}
