//! Shared data models for the VShort clip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Probed source videos and reframe decisions
//! - Clip windows, caption segments and clip results
//! - Session identifiers and the job state machine
//! - Encoding profiles
//! - Input validation (limits, filename sanitization, source references)

pub mod caption;
pub mod clip;
pub mod encoding;
pub mod error;
pub mod job;
pub mod style;
pub mod utils;
pub mod video;

// Re-export common types
pub use caption::CaptionSegment;
pub use clip::{ClipResult, ClipStatus, ClipWindow};
pub use encoding::EncodingConfig;
pub use error::{ValidationError, ValidationResult};
pub use job::{JobState, SessionId};
pub use style::{ReframeDecision, ReframeStrategy};
pub use utils::{sanitize_filename, SourceRef, MAX_FILENAME_LEN};
pub use video::{SourceVideo, ValidationLimits};
