//! End-to-end orchestrator tests with in-process collaborators.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use vshort_media::{
    Downloader, FfmpegCommand, FfmpegProgress, MediaError, MediaResult, MediaTool, RunLimits, SourceProber,
    Transcriber, Unavailable,
};
use vshort_models::{
    CaptionSegment, ClipStatus, JobState, ReframeStrategy, SourceRef, SourceVideo,
};
use vshort_worker::{
    Authorization, Collaborators, ExportDelivery, JobEventKind, LogDelivery, Orchestrator,
    WorkerConfig, WorkerError,
};

/// Writes every requested output and reports progress when a receiver is set.
/// Fails commands containing any of `fail_on`.
#[derive(Default)]
struct FakeTool {
    fail_on: Vec<&'static str>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeTool {
    fn failing_on(patterns: &[&'static str]) -> Self {
        Self {
            fail_on: patterns.to_vec(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn execute(&self, cmd: &FfmpegCommand, limits: &RunLimits) -> MediaResult<()> {
        if limits.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        let args = cmd.build_args();
        self.calls.lock().unwrap().push(args.clone());
        if self
            .fail_on
            .iter()
            .any(|pattern| args.iter().any(|a| a.contains(pattern)))
        {
            return Err(MediaError::command_failed(
                "ffmpeg",
                "simulated failure",
                Some("Error initializing filter".to_string()),
                Some(1),
            ));
        }
        if let Some(parent) = cmd.output().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(cmd.output(), b"rendered").await?;
        if let Some(tx) = &limits.progress {
            let _ = tx.try_send(FfmpegProgress {
                out_time_ms: 5_000,
                ..Default::default()
            });
            let _ = tx.try_send(FfmpegProgress {
                out_time_ms: 5_200,
                ..Default::default()
            });
            let _ = tx.try_send(FfmpegProgress {
                is_complete: true,
                ..Default::default()
            });
        }
        Ok(())
    }
}

/// Reports fixed geometry and duration for any file.
struct FakeProber {
    duration: f64,
    width: u32,
    height: u32,
    fail: bool,
}

#[async_trait]
impl SourceProber for FakeProber {
    async fn probe(&self, path: &Path, _limits: &RunLimits) -> MediaResult<SourceVideo> {
        if self.fail {
            return Err(MediaError::invalid_video("file has no streams"));
        }
        let size_bytes = tokio::fs::metadata(path).await?.len();
        Ok(SourceVideo {
            path: path.to_path_buf(),
            duration: self.duration,
            width: self.width,
            height: self.height,
            size_bytes,
        })
    }
}

enum Speech {
    Works,
    Fails,
    /// Earlier clips take longer than later ones
    SlowFirst,
}

struct FakeTranscriber(Speech);

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(
        &self,
        media: &Path,
        _model: Option<&str>,
        _limits: &RunLimits,
    ) -> MediaResult<Vec<CaptionSegment>> {
        match self.0 {
            Speech::Works => {}
            Speech::Fails => return Err(MediaError::TranscriptionFailed("model crashed".into())),
            Speech::SlowFirst => {
                let name = media.file_name().unwrap().to_string_lossy().into_owned();
                let delay = if name.contains("part01") {
                    80
                } else if name.contains("part02") {
                    40
                } else {
                    0
                };
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        Ok(vec![
            CaptionSegment::new(0.0, 1.2, "first line"),
            CaptionSegment::new(1.2, 2.5, "second line"),
        ])
    }
}

/// Drops a file named after the video title into the target directory.
struct FakeDownloader;

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        _url: &str,
        out_dir: &Path,
        _limits: &RunLimits,
    ) -> MediaResult<PathBuf> {
        let path = out_dir.join("Launch_Keynote-abc123.mp4");
        tokio::fs::write(&path, b"downloaded").await?;
        Ok(path)
    }
}

struct Harness {
    tmp: TempDir,
    tool: Arc<FakeTool>,
}

impl Harness {
    fn new(tool: FakeTool) -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            tool: Arc::new(tool),
        }
    }

    fn work_dir(&self) -> PathBuf {
        self.tmp.path().join("work")
    }

    fn config(&self) -> WorkerConfig {
        WorkerConfig {
            work_dir: self.work_dir(),
            authorization: Authorization::allow_list(["admin"]),
            ..WorkerConfig::default()
        }
    }

    fn orchestrator(
        &self,
        config: WorkerConfig,
        prober: FakeProber,
        transcriber: Arc<dyn Transcriber>,
    ) -> Orchestrator {
        let collaborators = Collaborators {
            tool: self.tool.clone(),
            prober: Arc::new(prober),
            transcriber,
            downloader: Arc::new(FakeDownloader),
        };
        Orchestrator::new(config, collaborators).unwrap()
    }

    async fn upload(&self, name: &str) -> SourceRef {
        self.upload_as(name, name).await
    }

    /// Stores the bytes under `file` but reports `original_name` to the job.
    async fn upload_as(&self, file: &str, original_name: &str) -> SourceRef {
        let dir = self.tmp.path().join("uploads");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(file);
        tokio::fs::write(&path, b"source bytes").await.unwrap();
        SourceRef::upload(path, original_name)
    }
}

fn prober(duration: f64, width: u32, height: u32) -> FakeProber {
    FakeProber {
        duration,
        width,
        height,
        fail: false,
    }
}

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_long_source_splits_into_three_captioned_clips() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(125.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Delivered);
    let spans: Vec<_> = report
        .clips
        .iter()
        .map(|c| (c.window.index, c.window.start, c.window.length))
        .collect();
    assert_eq!(spans, vec![(1, 0.0, 50.0), (2, 50.0, 50.0), (3, 100.0, 25.0)]);

    for (i, clip) in report.clips.iter().enumerate() {
        assert_eq!(clip.status, ClipStatus::Captioned);
        assert_eq!(file_name(&clip.path), format!("talk_part{:02}_final.mp4", i + 1));
        assert!(clip.path.exists());
    }

    let session_root = h.work_dir().join(report.session_id.as_str());
    assert!(session_root.join("converted").join("talk_9_16.mp4").exists());
    assert!(session_root.join("clips").join("talk_part03.mp4").exists());
    assert!(session_root.join("output").join("talk_part02.srt").exists());

    assert_eq!(report.summary.clip_count, 3);
    assert_eq!(report.summary.captioned_count, 3);
    assert!((report.summary.total_duration - 125.0).abs() < 1e-9);
    assert_eq!(report.summary.retention_hours, 24);

    let cuts: Vec<_> = h
        .tool
        .calls()
        .into_iter()
        .filter(|args| args.windows(2).any(|w| w == ["-c", "copy"]))
        .collect();
    assert_eq!(cuts.len(), 3);
}

#[tokio::test]
async fn test_cinematic_source_is_cropped() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(20.0, 2350, 1000),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("film.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.reframe.strategy, ReframeStrategy::CropCenter);
    assert_eq!((report.reframe.target_width, report.reframe.target_height), (1080, 1920));
    assert!(!report.reframe_fallback);
    let first = &h.tool.calls()[0];
    assert!(first.iter().any(|a| a.starts_with("crop=ih*9/16:ih:")));
}

#[tokio::test]
async fn test_square_source_gets_blurred_background() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(20.0, 1000, 1000),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("square.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.reframe.strategy, ReframeStrategy::BlurredBackgroundOverlay);
    assert_eq!(report.clips.len(), 1);
    assert_eq!(file_name(&report.clips[0].path), "square_part01_final.mp4");
}

#[tokio::test]
async fn test_missing_transcriber_still_delivers_every_clip() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(h.config(), prober(125.0, 1920, 1080), Arc::new(Unavailable));
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Delivered);
    assert_eq!(report.clips.len(), 3);
    for clip in &report.clips {
        assert_eq!(clip.status, ClipStatus::FallbackNoCaptions);
        assert!(file_name(&clip.path).ends_with("_nocaptions.mp4"));
        assert!(clip.path.exists());
    }
    assert_eq!(report.summary.captioned_count, 0);
    assert!(!h
        .tool
        .calls()
        .iter()
        .any(|args| args.iter().any(|a| a.starts_with("subtitles="))));
}

#[tokio::test]
async fn test_transcription_failure_yields_fallback_file() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Fails)),
    );
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.clips.len(), 1);
    let clip = &report.clips[0];
    assert_eq!(clip.status, ClipStatus::FallbackNoCaptions);
    let expected = h
        .work_dir()
        .join(report.session_id.as_str())
        .join("output")
        .join("talk_part01_nocaptions.mp4");
    assert_eq!(clip.path, expected);
    assert!(expected.exists());
}

#[tokio::test]
async fn test_overlay_failure_only_affects_captions() {
    let h = Harness::new(FakeTool::failing_on(&["subtitles="]));
    let orchestrator = h.orchestrator(
        h.config(),
        prober(75.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(report.clips.len(), 2);
    assert!(report
        .clips
        .iter()
        .all(|c| c.status == ClipStatus::FallbackNoCaptions && c.path.exists()));
}

#[tokio::test]
async fn test_oversized_upload_rejected_before_any_work() {
    let h = Harness::new(FakeTool::default());
    let mut config = h.config();
    config.limits.max_source_bytes = 4;
    let orchestrator = h.orchestrator(
        config,
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;

    let err = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Validation(_)));
    assert!(err.to_string().starts_with("File too large"));
    assert!(h.tool.calls().is_empty());
}

#[tokio::test]
async fn test_overlong_source_rejected_before_reframe() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(4000.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;

    let err = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Video too long (4000.0s > 3600s)");
    assert!(h.tool.calls().is_empty());
}

#[tokio::test]
async fn test_probe_failure_is_fatal() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        FakeProber {
            duration: 0.0,
            width: 0,
            height: 0,
            fail: true,
        },
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("broken.mp4").await;

    let err = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "probe");
}

#[tokio::test]
async fn test_reframe_falls_back_to_fit_and_pad() {
    let h = Harness::new(FakeTool::failing_on(&["gblur"]));
    let orchestrator = h.orchestrator(
        h.config(),
        prober(20.0, 1440, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert!(report.reframe_fallback);
    assert_eq!(report.reframe.strategy, ReframeStrategy::BlurredBackgroundOverlay);
    assert_eq!(report.state, JobState::Delivered);
}

#[tokio::test]
async fn test_reframe_failure_after_fallback_fails_job() {
    let h = Harness::new(FakeTool::failing_on(&["lanczos"]));
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = h
        .orchestrator(
            h.config(),
            prober(20.0, 1920, 1080),
            Arc::new(FakeTranscriber(Speech::Works)),
        )
        .with_events(tx);
    let source = h.upload("talk.mp4").await;

    let err = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Transform(_)));
    assert_eq!(h.tool.calls().len(), 2);

    drop(orchestrator);
    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event.kind);
    }
    assert!(matches!(last, Some(JobEventKind::Failed { ref kind, .. }) if kind == "transform"));
}

#[tokio::test]
async fn test_cancelled_job_leaves_session_for_reaper() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(20.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = orchestrator
        .process(&source, None, &LogDelivery, rx)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Cancelled));

    let mut sessions = tokio::fs::read_dir(h.work_dir()).await.unwrap();
    let session = sessions.next_entry().await.unwrap().unwrap();
    assert!(session.path().join("downloads").join("talk.mp4").exists());
}

#[tokio::test]
async fn test_session_failure_is_reported_as_failed_job() {
    let h = Harness::new(FakeTool::default());
    // A plain file where the work directory should be
    tokio::fs::write(h.work_dir(), b"not a directory").await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let orchestrator = h
        .orchestrator(
            h.config(),
            prober(30.0, 1920, 1080),
            Arc::new(FakeTranscriber(Speech::Works)),
        )
        .with_events(tx);
    let source = h.upload("talk.mp4").await;

    let err = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Io(_)));
    assert!(h.tool.calls().is_empty());

    drop(orchestrator);
    let event = rx.recv().await.unwrap();
    assert_eq!(event.session_id, None);
    assert!(matches!(event.kind, JobEventKind::Failed { ref kind, .. } if kind == "io"));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_events_follow_state_machine() {
    let h = Harness::new(FakeTool::default());
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = h
        .orchestrator(
            h.config(),
            prober(60.0, 1920, 1080),
            Arc::new(FakeTranscriber(Speech::Works)),
        )
        .with_events(tx);
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();
    drop(orchestrator);

    let mut states = Vec::new();
    let mut reframe_percent = Vec::new();
    let mut finished = 0;
    let mut completed = None;
    while let Some(event) = rx.recv().await {
        assert_eq!(event.session_id.as_ref(), Some(&report.session_id));
        match event.kind {
            JobEventKind::StageEntered { state } => states.push(state),
            JobEventKind::ReframeProgress { percent } => reframe_percent.push(percent),
            JobEventKind::ClipFinished { total, .. } => {
                assert_eq!(total, 2);
                finished += 1;
            }
            JobEventKind::Completed { clip_count } => completed = Some(clip_count),
            _ => {}
        }
    }

    assert_eq!(
        states,
        vec![
            JobState::Probed,
            JobState::Validated,
            JobState::Reframed,
            JobState::Segmented,
            JobState::CaptioningClips,
            JobState::Collected,
            JobState::Delivered,
        ]
    );
    // 5.0s and 5.2s of 60s both round down to 8%
    assert_eq!(reframe_percent, vec![8, 100]);
    assert_eq!(finished, 2);
    assert_eq!(completed, Some(2));
}

#[tokio::test]
async fn test_parallel_captioning_keeps_window_order() {
    let h = Harness::new(FakeTool::default());
    let mut config = h.config();
    config.max_parallel_clips = 3;
    let orchestrator = h.orchestrator(
        config,
        prober(125.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::SlowFirst)),
    );
    let source = h.upload("talk.mp4").await;

    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    let indices: Vec<_> = report.clips.iter().map(|c| c.window.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_url_source_and_export_delivery() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = SourceRef::url("https://example.com/watch?v=abc123").unwrap();
    let export = h.tmp.path().join("export");

    let report = orchestrator
        .process(&source, None, &ExportDelivery::new(&export), no_cancel())
        .await
        .unwrap();

    assert_eq!(
        file_name(&report.clips[0].path),
        "Launch_Keynote-abc123_part01_final.mp4"
    );
    let exported = export
        .join(report.session_id.as_str())
        .join("Launch_Keynote-abc123_part01_final.mp4");
    assert!(exported.exists());
    assert!(export
        .join(report.session_id.as_str())
        .join("summary.json")
        .exists());
}

#[tokio::test]
async fn test_requested_name_is_sanitized() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload_as("evil.mp4", "../../evil name.mp4").await;

    let report = orchestrator
        .process(&source, Some("../My Clip!.mp4"), &LogDelivery, no_cancel())
        .await
        .unwrap();

    assert_eq!(file_name(&report.clips[0].path), "My_Clip__part01_final.mp4");
    let session_root = h.work_dir().join(report.session_id.as_str());
    assert!(report.clips[0].path.starts_with(&session_root));
    assert!(session_root.join("downloads").join("evil_name.mp4").exists());
}

#[tokio::test]
async fn test_concurrent_jobs_use_separate_sessions() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let a = h.upload("a.mp4").await;
    let b = h.upload("b.mp4").await;

    let (ra, rb) = tokio::join!(
        orchestrator.process(&a, None, &LogDelivery, no_cancel()),
        orchestrator.process(&b, None, &LogDelivery, no_cancel()),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_ne!(ra.session_id, rb.session_id);
    assert!(ra.clips[0].path.exists() && rb.clips[0].path.exists());
}

#[tokio::test]
async fn test_cleanup_requires_authorization() {
    let h = Harness::new(FakeTool::default());
    let orchestrator = h.orchestrator(
        h.config(),
        prober(30.0, 1920, 1080),
        Arc::new(FakeTranscriber(Speech::Works)),
    );
    let source = h.upload("talk.mp4").await;
    let report = orchestrator
        .process(&source, None, &LogDelivery, no_cancel())
        .await
        .unwrap();

    let err = orchestrator.cleanup("mallory").await.unwrap_err();
    assert!(matches!(err, WorkerError::Unauthorized(_)));

    let sweep = orchestrator.cleanup("admin").await.unwrap();
    assert!(sweep.removed.is_empty());
    assert!(h.work_dir().join(report.session_id.as_str()).exists());
}
