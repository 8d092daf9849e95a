//! Session-scoped clip pipeline.
//!
//! This crate provides:
//! - Immutable worker configuration and the maintenance authorization predicate
//! - Session workspaces and the reaper that expires them
//! - The per-clip caption pipeline with its uncaptioned fallback
//! - The orchestrator state machine and job reports
//! - Clip delivery, progress events and metrics

pub mod caption_pipeline;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod reaper;
pub mod session;

pub use caption_pipeline::{CaptionLimits, CaptionPipeline};
pub use config::{Authorization, WorkerConfig};
pub use delivery::{ClipDelivery, ExportDelivery, LogDelivery};
pub use error::{CaptionStep, Stage, WorkerError, WorkerResult};
pub use events::{EventSink, JobEvent, JobEventKind};
pub use logging::JobLogger;
pub use processor::{Collaborators, JobReport, JobSummary, Orchestrator};
pub use reaper::{ReapReport, Reaper};
pub use session::{Session, SessionIdGenerator, SessionLifecycle, UuidSessionIds};
