//! Job progress events.
//!
//! Events go out over an optional bounded channel. Sending never waits: when
//! the receiver lags behind, events are dropped.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use vshort_models::{ClipStatus, JobState, SessionId};

/// A progress event for one job.
///
/// `session_id` is absent only for jobs that failed before a session existed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    StageEntered { state: JobState },
    /// Whole-percent progress of the reframe pass
    ReframeProgress { percent: u8 },
    ClipStarted { index: u32, total: usize },
    ClipFinished { index: u32, total: usize, status: ClipStatus },
    Completed { clip_count: usize },
    Failed { kind: String, message: String },
}

/// Non-blocking event sender.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<JobEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, session_id: &SessionId, kind: JobEventKind) {
        self.send(JobEvent {
            session_id: Some(session_id.clone()),
            kind,
        });
    }

    pub fn send(&self, event: JobEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            debug!("Dropping job event: {}", e);
        }
    }
}
