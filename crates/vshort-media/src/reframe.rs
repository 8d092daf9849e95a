//! Reframing a source of any geometry onto the 9:16 canvas.
//!
//! Strategy selection is a pure function of the aspect ratio. The pixel work
//! is a single ffmpeg filter graph built from the decision, with one retry
//! using a plain fit-and-pad graph if the chosen graph fails.

use std::path::Path;
use tracing::{info, warn};

use vshort_models::style::DEFAULT_TARGET_HEIGHT;
use vshort_models::{EncodingConfig, ReframeDecision, ReframeStrategy};

use crate::command::{FfmpegCommand, MediaTool, RunLimits};
use crate::error::MediaResult;

/// Sources wider than this are cropped.
pub const CINEMATIC_THRESHOLD: f64 = 1.7;
/// Sources narrower than this are padded.
pub const TALL_THRESHOLD: f64 = 0.7;

/// Blur strength for the background rendition.
const BACKGROUND_BLUR_SIGMA: u32 = 20;

/// Pick a strategy for the default 1080x1920 canvas.
pub fn select(aspect_ratio: f64) -> ReframeDecision {
    select_for_height(aspect_ratio, DEFAULT_TARGET_HEIGHT)
}

/// Pick a strategy for a 9:16 canvas of the given height.
///
/// Both thresholds are exclusive: exactly 1.7 and exactly 0.7 fall in the
/// middle band. Non-finite ratios also land there.
pub fn select_for_height(aspect_ratio: f64, target_height: u32) -> ReframeDecision {
    let strategy = if aspect_ratio > CINEMATIC_THRESHOLD {
        ReframeStrategy::CropCenter
    } else if aspect_ratio < TALL_THRESHOLD {
        ReframeStrategy::PadLetterbox
    } else {
        ReframeStrategy::BlurredBackgroundOverlay
    };
    ReframeDecision::for_height(strategy, target_height)
}

/// Filter graph implementing `decision`.
pub fn filter_graph(decision: &ReframeDecision) -> String {
    let w = decision.target_width;
    let h = decision.target_height;
    match decision.strategy {
        ReframeStrategy::CropCenter => format!(
            "crop=ih*9/16:ih:(iw-ih*9/16)/2:0,scale={w}:{h}:flags=lanczos"
        ),
        // Fit inside the canvas: sources narrower than 9:16 are bounded by height
        ReframeStrategy::PadLetterbox => fallback_filter(decision),
        ReframeStrategy::BlurredBackgroundOverlay => format!(
            "split=2[bg][fg];\
             [bg]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},gblur=sigma={BACKGROUND_BLUR_SIGMA}[bg];\
             [fg]scale={w}:-2:flags=lanczos[fg];\
             [bg][fg]overlay=(W-w)/2:(H-h)/2"
        ),
    }
}

/// Simplified graph used when the strategy graph fails: fit inside the
/// canvas and pad with black.
pub fn fallback_filter(decision: &ReframeDecision) -> String {
    let w = decision.target_width;
    let h = decision.target_height;
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease:flags=lanczos,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"
    )
}

/// How the reframed master was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReframeOutcome {
    pub decision: ReframeDecision,
    /// True when the strategy graph failed and the fallback graph was used
    pub used_fallback: bool,
}

fn reframe_command(input: &Path, output: &Path, filter: String) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(filter)
        .encoding(&EncodingConfig::for_reframe())
}

/// Render `input` onto the canvas described by `decision`.
///
/// A failed strategy graph is retried once with [`fallback_filter`], unless
/// the strategy graph already is the fallback. Timeouts and cancellation are
/// not retried.
pub async fn reframe_video(
    tool: &dyn MediaTool,
    input: &Path,
    output: &Path,
    decision: ReframeDecision,
    limits: &RunLimits,
) -> MediaResult<ReframeOutcome> {
    info!(
        "Reframing {} with {} ({}x{})",
        input.display(),
        decision.strategy,
        decision.target_width,
        decision.target_height
    );

    let graph = filter_graph(&decision);
    let fallback_graph = fallback_filter(&decision);
    let retryable = graph != fallback_graph;

    let primary = reframe_command(input, output, graph);
    match tool.execute(&primary, limits).await {
        Ok(()) => Ok(ReframeOutcome {
            decision,
            used_fallback: false,
        }),
        Err(e) if !retryable || e.is_timeout() || e.is_cancelled() => Err(e),
        Err(e) => {
            warn!(
                "Reframe with {} failed, retrying with fit-and-pad: {}",
                decision.strategy, e
            );
            metrics::counter!("vshort_reframe_fallbacks_total").increment(1);
            let _ = tokio::fs::remove_file(output).await;

            let fallback = reframe_command(input, output, fallback_graph);
            tool.execute(&fallback, limits).await?;
            Ok(ReframeOutcome {
                decision,
                used_fallback: true,
            })
        }
    }
}
