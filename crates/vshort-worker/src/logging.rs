//! Structured log lines for a running job.
//!
//! Lines emitted inside [`JobLogger::span`] inherit the session id and the
//! source kind. Failures are logged with the session id as an explicit field
//! because a job can fail before its session exists.

use std::path::Path;
use tracing::{error, info, warn, Span};

use vshort_models::{ClipResult, ClipStatus, JobState, ReframeDecision, SessionId, SourceRef};

use crate::error::WorkerError;
use crate::processor::JobSummary;

/// Placeholder logged for jobs that never got a session.
const NO_SESSION: &str = "-";

#[derive(Debug, Clone)]
pub struct JobLogger {
    session_id: Option<SessionId>,
    source: &'static str,
}

impl JobLogger {
    pub fn new(source: &SourceRef) -> Self {
        let source = match source {
            SourceRef::Url { .. } => "url",
            SourceRef::Upload { .. } => "upload",
        };
        Self {
            session_id: None,
            source,
        }
    }

    /// Bind the logger to the job's session.
    pub fn attach(&mut self, session_id: &SessionId) {
        self.session_id = Some(session_id.clone());
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    fn session_label(&self) -> &str {
        self.session_id
            .as_ref()
            .map(SessionId::as_str)
            .unwrap_or(NO_SESSION)
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            session_id = %self.session_label(),
            source = self.source
        )
    }

    pub fn started(&self, session_root: &Path) {
        info!("Job started in {}", session_root.display());
    }

    pub fn transition(&self, from: JobState, to: JobState) {
        info!(from = %from, to = %to, "Job state changed");
    }

    pub fn reframed(&self, decision: &ReframeDecision, used_fallback: bool, master: &Path) {
        if used_fallback {
            warn!(
                strategy = %decision.strategy,
                "Reframe graph failed, used fit-and-pad for {}",
                master.display()
            );
        } else {
            info!(
                strategy = %decision.strategy,
                width = decision.target_width,
                height = decision.target_height,
                "Reframed {}",
                master.display()
            );
        }
    }

    pub fn clip_finished(&self, result: &ClipResult) {
        let window = &result.window;
        match result.status {
            ClipStatus::Captioned => info!(
                clip_index = window.index,
                start = window.start,
                length = window.length,
                "Clip captioned: {}",
                result.path.display()
            ),
            ClipStatus::FallbackNoCaptions => warn!(
                clip_index = window.index,
                start = window.start,
                length = window.length,
                "Clip delivered without captions: {}",
                result.path.display()
            ),
        }
    }

    pub fn completed(&self, summary: &JobSummary) {
        info!(
            clips = summary.clip_count,
            captioned = summary.captioned_count,
            "{}",
            summary.message()
        );
    }

    pub fn failed(&self, state: JobState, err: &WorkerError) {
        error!(
            session_id = %self.session_label(),
            source = self.source,
            state = %state,
            kind = err.kind(),
            "Job failed: {}",
            err
        );
    }
}
