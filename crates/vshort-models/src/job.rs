//! Session identifiers and the job state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a session workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID (32 hex characters).
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the ID is usable as a single directory name.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a single job.
///
/// ```text
/// Created → Probed → Validated → Reframed → Segmented → CaptioningClips → Collected → Delivered
/// ```
///
/// `Failed` is reachable from every state before `CaptioningClips`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Created,
    Probed,
    Validated,
    Reframed,
    Segmented,
    CaptioningClips,
    Collected,
    Delivered,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Probed => "probed",
            JobState::Validated => "validated",
            JobState::Reframed => "reframed",
            JobState::Segmented => "segmented",
            JobState::CaptioningClips => "captioning_clips",
            JobState::Collected => "collected",
            JobState::Delivered => "delivered",
            JobState::Failed => "failed",
        }
    }

    /// The next state on the success path, if any.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Created => Some(JobState::Probed),
            JobState::Probed => Some(JobState::Validated),
            JobState::Validated => Some(JobState::Reframed),
            JobState::Reframed => Some(JobState::Segmented),
            JobState::Segmented => Some(JobState::CaptioningClips),
            JobState::CaptioningClips => Some(JobState::Collected),
            JobState::Collected => Some(JobState::Delivered),
            JobState::Delivered | JobState::Failed => None,
        }
    }

    /// Whether a fatal error may still move the job to `Failed`.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            JobState::Created
                | JobState::Probed
                | JobState::Validated
                | JobState::Reframed
                | JobState::Segmented
        )
    }

    pub fn can_transition_to(&self, to: JobState) -> bool {
        if to == JobState::Failed {
            return self.can_fail();
        }
        self.next() == Some(to)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
