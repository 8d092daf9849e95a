//! Worker error types.

use std::fmt;
use thiserror::Error;

use vshort_media::MediaError;
use vshort_models::{JobState, ValidationError};

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Pipeline stage an external call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquisition,
    Probe,
    Transform,
    Delivery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquisition => "acquisition",
            Stage::Probe => "probe",
            Stage::Transform => "transform",
            Stage::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step of the per-clip caption sub-pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStep {
    Transcribe,
    RenderTrack,
    Overlay,
    Finalize,
}

impl CaptionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionStep::Transcribe => "transcribe",
            CaptionStep::RenderTrack => "render_track",
            CaptionStep::Overlay => "overlay",
            CaptionStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for CaptionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Could not get the video: {0}")]
    Acquisition(#[source] MediaError),

    #[error("Could not read video properties: {0}")]
    Probe(#[source] MediaError),

    #[error("Video conversion failed: {0}")]
    Transform(#[source] MediaError),

    #[error("Caption {step} failed: {source}")]
    CaptionStage {
        step: CaptionStep,
        #[source]
        source: MediaError,
    },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("{stage} timed out after {seconds} seconds")]
    Timeout { stage: Stage, seconds: u64 },

    #[error("Requester {0} is not authorized for maintenance")]
    Unauthorized(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job state transition {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn caption(step: CaptionStep, source: MediaError) -> Self {
        Self::CaptionStage { step, source }
    }

    /// Attribute a collaborator failure to the stage it happened in.
    ///
    /// Timeouts keep the stage, cancellation and validation keep their own
    /// kind.
    pub fn from_media(stage: Stage, err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::Timeout(seconds) => Self::Timeout { stage, seconds },
            MediaError::Validation(e) => Self::Validation(e),
            other => match stage {
                Stage::Acquisition => Self::Acquisition(other),
                Stage::Probe => Self::Probe(other),
                Stage::Transform => Self::Transform(other),
                Stage::Delivery => Self::Delivery(other.to_string()),
            },
        }
    }

    /// Error kind used for reporting and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Validation(_) => "validation",
            WorkerError::Acquisition(_) => "acquisition",
            WorkerError::Probe(_) => "probe",
            WorkerError::Transform(_) => "transform",
            WorkerError::CaptionStage { .. } => "caption_stage",
            WorkerError::Delivery(_) => "delivery",
            WorkerError::Timeout { stage, .. } => stage.as_str(),
            WorkerError::Unauthorized(_) => "unauthorized",
            WorkerError::Cancelled => "cancelled",
            WorkerError::Config(_) => "config",
            WorkerError::InvalidTransition { .. } => "internal",
            WorkerError::Io(_) => "io",
        }
    }

    /// Whether the error aborts the whole job. Caption-stage errors are
    /// recovered per clip.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WorkerError::CaptionStage { .. })
    }
}
