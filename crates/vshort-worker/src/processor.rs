//! Job orchestration.
//!
//! [`Orchestrator::process`] drives one source through the job state machine:
//!
//! ```text
//! Created → Probed → Validated → Reframed → Segmented → CaptioningClips → Collected → Delivered
//! ```
//!
//! Errors before captioning are fatal and move the job to `Failed`. Clip
//! captioning cannot fail a job: each window ends as either a captioned or a
//! fallback clip.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{info, Instrument};

use vshort_media::fs_utils::copy_file;
use vshort_media::{
    detect_transcriber, extract_windows, reframe_video, segment, select_for_height, Downloader,
    FfmpegProgress, FfmpegTool, FfprobeProber, MediaError, MediaResult, MediaTool,
    ReframeOutcome, RunLimits, SourceProber, Transcriber, YtDlpDownloader,
};
use vshort_models::{
    sanitize_filename, ClipResult, ClipWindow, JobState, ReframeDecision, SessionId, SourceRef,
    SourceVideo, ValidationError,
};

use crate::caption_pipeline::{CaptionLimits, CaptionPipeline};
use crate::config::WorkerConfig;
use crate::delivery::ClipDelivery;
use crate::error::{Stage, WorkerError, WorkerResult};
use crate::events::{EventSink, JobEvent, JobEventKind};
use crate::logging::JobLogger;
use crate::metrics;
use crate::reaper::{ReapReport, Reaper};
use crate::session::{Session, SessionIdGenerator, SessionLifecycle};

/// External capabilities the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub tool: Arc<dyn MediaTool>,
    pub prober: Arc<dyn SourceProber>,
    pub transcriber: Arc<dyn Transcriber>,
    pub downloader: Arc<dyn Downloader>,
}

impl Collaborators {
    /// ffmpeg, ffprobe and yt-dlp from PATH, plus whisper when installed.
    pub fn system(config: &WorkerConfig) -> Self {
        Self {
            tool: Arc::new(FfmpegTool),
            prober: Arc::new(FfprobeProber),
            transcriber: detect_transcriber(&config.whisper_model),
            downloader: Arc::new(YtDlpDownloader::new()),
        }
    }
}

/// Totals reported to the requester after delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub session_id: SessionId,
    pub clip_count: usize,
    pub captioned_count: usize,
    /// Sum of nominal window lengths in seconds
    pub total_duration: f64,
    pub retention_hours: u64,
}

impl JobSummary {
    fn from_clips(session_id: &SessionId, clips: &[ClipResult], retention_hours: u64) -> Self {
        Self {
            session_id: session_id.clone(),
            clip_count: clips.len(),
            captioned_count: clips.iter().filter(|c| c.is_captioned()).count(),
            total_duration: clips.iter().map(|c| c.window.length).sum(),
            retention_hours,
        }
    }

    /// Human-readable summary line.
    pub fn message(&self) -> String {
        format!(
            "Processed {} clip(s), {} with captions, {:.1}s total. Session {}. Files are deleted after {} hours.",
            self.clip_count,
            self.captioned_count,
            self.total_duration,
            self.session_id,
            self.retention_hours
        )
    }
}

/// Result of a delivered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub session_id: SessionId,
    pub state: JobState,
    pub source: SourceVideo,
    pub reframe: ReframeDecision,
    /// True when the strategy graph failed and fit-and-pad was used
    pub reframe_fallback: bool,
    /// Ordered by window index
    pub clips: Vec<ClipResult>,
    pub summary: JobSummary,
}

/// State of one running job.
struct JobRun<'a> {
    state: JobState,
    logger: JobLogger,
    events: &'a EventSink,
}

impl<'a> JobRun<'a> {
    fn new(source: &SourceRef, events: &'a EventSink) -> Self {
        Self {
            state: JobState::Created,
            logger: JobLogger::new(source),
            events,
        }
    }

    fn attach(&mut self, session: &Session) {
        self.logger.attach(&session.id);
    }

    fn emit(&self, kind: JobEventKind) {
        self.events.send(JobEvent {
            session_id: self.logger.session_id().cloned(),
            kind,
        });
    }

    fn advance(&mut self, to: JobState) -> WorkerResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(WorkerError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.logger.transition(self.state, to);
        self.state = to;
        self.emit(JobEventKind::StageEntered { state: to });
        Ok(())
    }

    /// Record a job-ending error. The state only moves to `Failed` where the
    /// state machine allows it.
    fn fail(&mut self, err: &WorkerError) {
        if self.state.can_fail() {
            self.state = JobState::Failed;
        }
        self.logger.failed(self.state, err);
        self.emit(JobEventKind::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        metrics::record_job_failed(err.kind());
    }
}

/// Sequences acquisition, probing, reframing, segmentation, captioning and
/// delivery for each job.
pub struct Orchestrator {
    config: Arc<WorkerConfig>,
    collaborators: Collaborators,
    sessions: SessionLifecycle,
    captions: CaptionPipeline,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(config: WorkerConfig, collaborators: Collaborators) -> WorkerResult<Self> {
        config.validate()?;

        let captions = CaptionPipeline::new(
            collaborators.tool.clone(),
            collaborators.transcriber.clone(),
            Some(config.whisper_model.clone()),
        );
        if !captions.captions_enabled() {
            info!(
                "Transcriber '{}' unavailable, clips will be delivered without captions",
                collaborators.transcriber.name()
            );
        }

        Ok(Self {
            sessions: SessionLifecycle::new(&config.work_dir),
            config: Arc::new(config),
            collaborators,
            captions,
            events: EventSink::disabled(),
        })
    }

    /// Use a custom session id source.
    pub fn with_session_ids(mut self, ids: Arc<dyn SessionIdGenerator>) -> Self {
        self.sessions = SessionLifecycle::with_ids(&self.config.work_dir, ids);
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<JobEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Reaper over this orchestrator's work directory.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(&self.config.work_dir, self.config.retention)
    }

    /// Delete expired sessions on behalf of `requester`.
    pub async fn cleanup(&self, requester: &str) -> WorkerResult<ReapReport> {
        if !self.config.authorization.allows(requester) {
            return Err(WorkerError::Unauthorized(requester.to_string()));
        }
        info!(requester = %requester, "Running session cleanup");
        self.reaper().sweep().await
    }

    /// Run one job end to end.
    ///
    /// `name` overrides the base name of the produced clips. On cancellation
    /// the session is left on disk for the reaper.
    pub async fn process(
        &self,
        source: &SourceRef,
        name: Option<&str>,
        delivery: &dyn ClipDelivery,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<JobReport> {
        let started = Instant::now();
        let mut job = JobRun::new(source, &self.events);
        let session = match self.sessions.create().await {
            Ok(session) => session,
            Err(e) => {
                job.fail(&e);
                return Err(e);
            }
        };
        job.attach(&session);
        let span = job.logger.span();

        async {
            job.logger.started(&session.root);
            match self
                .run_stages(&session, &mut job, source, name, delivery, cancel)
                .await
            {
                Ok(report) => {
                    job.logger.completed(&report.summary);
                    job.emit(JobEventKind::Completed {
                        clip_count: report.clips.len(),
                    });
                    metrics::record_job_completed(started.elapsed().as_secs_f64());
                    Ok(report)
                }
                Err(e) => {
                    job.fail(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        session: &Session,
        job: &mut JobRun<'_>,
        source: &SourceRef,
        name: Option<&str>,
        delivery: &dyn ClipDelivery,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<JobReport> {
        let limits = RunLimits::new()
            .with_timeout(self.config.command_timeout)
            .with_cancel(cancel.clone());
        let tool = self.collaborators.tool.as_ref();

        let input = self.acquire(source, session, &limits).await?;

        let video = self
            .collaborators
            .prober
            .probe(&input, &limits)
            .await
            .map_err(|e| WorkerError::from_media(Stage::Probe, e))?;
        job.advance(JobState::Probed)?;

        self.config.limits.check(&video)?;
        job.advance(JobState::Validated)?;

        let base = clip_base_name(name, &video);
        let decision = select_for_height(video.aspect_ratio(), self.config.target_height);
        let master = session.converted_dir().join(format!("{}_9_16.mp4", base));
        let outcome = self
            .reframe_with_progress(&session.id, &input, &master, decision, video.duration, &limits)
            .await
            .map_err(|e| WorkerError::from_media(Stage::Transform, e))?;
        job.logger.reframed(&decision, outcome.used_fallback, &master);
        job.advance(JobState::Reframed)?;

        let windows = segment(video.duration, self.config.limits.max_clip_seconds)?;
        let clips = extract_windows(tool, &master, &session.clips_dir(), &base, &windows, &limits)
            .await
            .map_err(|e| WorkerError::from_media(Stage::Transform, e))?;
        if clips.is_empty() || clips.len() != windows.len() {
            return Err(WorkerError::Transform(MediaError::internal(format!(
                "expected {} clips, produced {}",
                windows.len(),
                clips.len()
            ))));
        }
        job.advance(JobState::Segmented)?;

        job.advance(JobState::CaptioningClips)?;
        let results = self
            .caption_all(session, &job.logger, &windows, &clips, cancel.clone())
            .await;
        job.advance(JobState::Collected)?;

        if *cancel.borrow() {
            return Err(WorkerError::Cancelled);
        }

        let summary = JobSummary::from_clips(&session.id, &results, self.config.retention_hours());
        delivery.deliver(&session.id, &results, &summary).await?;
        job.advance(JobState::Delivered)?;

        Ok(JobReport {
            session_id: session.id.clone(),
            state: job.state,
            source: video,
            reframe: decision,
            reframe_fallback: outcome.used_fallback,
            clips: results,
            summary,
        })
    }

    /// Reframe `input` into `master`, emitting a `ReframeProgress` event for
    /// each whole percent of `total_seconds` written.
    async fn reframe_with_progress(
        &self,
        session_id: &SessionId,
        input: &Path,
        master: &Path,
        decision: ReframeDecision,
        total_seconds: f64,
        limits: &RunLimits,
    ) -> MediaResult<ReframeOutcome> {
        let (tx, mut rx) = mpsc::channel::<FfmpegProgress>(16);
        let tool = self.collaborators.tool.as_ref();
        let limits = limits.clone().with_progress(tx);

        // The sender lives in this future, so the forwarder ends with it
        let run = async move { reframe_video(tool, input, master, decision, &limits).await };
        let forward = async {
            let mut last = None;
            while let Some(progress) = rx.recv().await {
                let percent = progress.percentage(total_seconds).floor() as u8;
                if last != Some(percent) {
                    last = Some(percent);
                    self.events
                        .emit(session_id, JobEventKind::ReframeProgress { percent });
                }
            }
        };

        let (outcome, ()) = tokio::join!(run, forward);
        outcome
    }

    /// Place the source video in the session's downloads area.
    async fn acquire(
        &self,
        source: &SourceRef,
        session: &Session,
        limits: &RunLimits,
    ) -> WorkerResult<PathBuf> {
        match source {
            SourceRef::Url { url } => {
                let SourceRef::Url { url } = SourceRef::url(url)? else {
                    return Err(ValidationError::InvalidUrl.into());
                };
                self.collaborators
                    .downloader
                    .download(&url, &session.downloads_dir(), limits)
                    .await
                    .map_err(|e| WorkerError::from_media(Stage::Acquisition, e))
            }
            SourceRef::Upload {
                path,
                original_name,
            } => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| ValidationError::MissingFile(path.display().to_string()))?;
                // Cheap size gate before copying anything
                self.config.limits.check_size(metadata.len())?;

                let dst = session
                    .downloads_dir()
                    .join(sanitize_filename(original_name));
                copy_file(path, &dst)
                    .await
                    .map_err(|e| WorkerError::from_media(Stage::Acquisition, e))?;
                Ok(dst)
            }
        }
    }

    /// Caption every clip, at most `max_parallel_clips` at a time. Results
    /// keep window order.
    async fn caption_all(
        &self,
        session: &Session,
        logger: &JobLogger,
        windows: &[ClipWindow],
        clips: &[PathBuf],
        cancel: watch::Receiver<bool>,
    ) -> Vec<ClipResult> {
        let limits = CaptionLimits {
            transcribe: RunLimits::new()
                .with_timeout(self.config.transcribe_timeout)
                .with_cancel(cancel.clone()),
            encode: RunLimits::new()
                .with_timeout(self.config.command_timeout)
                .with_cancel(cancel),
        };
        let output_dir = session.output_dir();
        let total = windows.len();
        let limits = &limits;
        let output_dir = output_dir.as_path();

        stream::iter(windows.iter().copied().zip(clips.iter()))
            .map(|(window, clip)| async move {
                self.events.emit(
                    &session.id,
                    JobEventKind::ClipStarted {
                        index: window.index,
                        total,
                    },
                );
                let result = self
                    .captions
                    .process_clip(window, clip, output_dir, limits)
                    .await;
                logger.clip_finished(&result);
                metrics::record_clip(result.status);
                self.events.emit(
                    &session.id,
                    JobEventKind::ClipFinished {
                        index: window.index,
                        total,
                        status: result.status,
                    },
                );
                result
            })
            .buffered(self.config.max_parallel_clips)
            .collect()
            .await
    }
}

/// Sanitized base name for clip files: the requested name without its
/// extension, or the source's stem.
fn clip_base_name(name: Option<&str>, video: &SourceVideo) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let safe = sanitize_filename(name);
            Path::new(&safe)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(safe)
        }
        None => sanitize_filename(&video.stem()),
    }
}
