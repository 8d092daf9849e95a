//! Hand-off of finished clips.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use vshort_media::fs_utils::copy_file;
use vshort_models::{ClipResult, SessionId};

use crate::error::{WorkerError, WorkerResult};
use crate::processor::JobSummary;

/// Receives the ordered clip results of a finished job.
///
/// A failure leaves the clips in the session for the reaper.
#[async_trait]
pub trait ClipDelivery: Send + Sync {
    async fn deliver(
        &self,
        session_id: &SessionId,
        clips: &[ClipResult],
        summary: &JobSummary,
    ) -> WorkerResult<()>;
}

/// Copies clips into `{dir}/{session_id}/` and writes `summary.json` next to them.
#[derive(Debug, Clone)]
pub struct ExportDelivery {
    dir: PathBuf,
}

impl ExportDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ClipDelivery for ExportDelivery {
    async fn deliver(
        &self,
        session_id: &SessionId,
        clips: &[ClipResult],
        summary: &JobSummary,
    ) -> WorkerResult<()> {
        let target = self.dir.join(session_id.as_str());
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| WorkerError::delivery(format!("{}: {}", target.display(), e)))?;

        for clip in clips {
            let Some(name) = clip.path.file_name() else {
                return Err(WorkerError::delivery(format!(
                    "clip {} has no file name",
                    clip.window.index
                )));
            };
            let dst = target.join(name);
            copy_file(&clip.path, &dst)
                .await
                .map_err(|e| WorkerError::delivery(format!("clip {}: {}", clip.window.index, e)))?;
        }

        let json = serde_json::to_vec_pretty(summary)
            .map_err(|e| WorkerError::delivery(format!("summary: {}", e)))?;
        tokio::fs::write(target.join("summary.json"), json)
            .await
            .map_err(|e| WorkerError::delivery(format!("summary: {}", e)))?;

        info!("Exported {} clip(s) to {}", clips.len(), target.display());
        Ok(())
    }
}

/// Leaves clips in place and logs where they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDelivery;

#[async_trait]
impl ClipDelivery for LogDelivery {
    async fn deliver(
        &self,
        session_id: &SessionId,
        clips: &[ClipResult],
        summary: &JobSummary,
    ) -> WorkerResult<()> {
        for clip in clips {
            info!(
                session_id = %session_id,
                clip_index = clip.window.index,
                status = %clip.status,
                "Clip ready: {}",
                clip.path.display()
            );
        }
        info!(session_id = %session_id, "{}", summary.message());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vshort_models::{ClipStatus, ClipWindow};

    fn summary(id: &SessionId, clips: usize) -> JobSummary {
        JobSummary {
            session_id: id.clone(),
            clip_count: clips,
            captioned_count: 0,
            total_duration: 30.0,
            retention_hours: 24,
        }
    }

    #[tokio::test]
    async fn test_export_copies_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut clips = Vec::new();
        for i in 1..=2u32 {
            let path = tmp.path().join(format!("talk_part{:02}_final.mp4", i));
            tokio::fs::write(&path, format!("clip{}", i)).await.unwrap();
            clips.push(ClipResult {
                window: ClipWindow::new(i, (i - 1) as f64 * 15.0, 15.0),
                path,
                status: ClipStatus::Captioned,
            });
        }

        let id = SessionId::from_string("s1");
        let export = tmp.path().join("export");
        ExportDelivery::new(&export)
            .deliver(&id, &clips, &summary(&id, 2))
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read(export.join("s1").join("talk_part02_final.mp4"))
                .await
                .unwrap(),
            b"clip2"
        );
        let json = tokio::fs::read_to_string(export.join("s1").join("summary.json"))
            .await
            .unwrap();
        assert!(json.contains("\"clip_count\": 2"));
    }

    #[tokio::test]
    async fn test_export_missing_clip_is_delivery_error() {
        let tmp = TempDir::new().unwrap();
        let id = SessionId::from_string("s1");
        let clips = vec![ClipResult {
            window: ClipWindow::new(1, 0.0, 10.0),
            path: tmp.path().join("gone.mp4"),
            status: ClipStatus::FallbackNoCaptions,
        }];
        let err = ExportDelivery::new(tmp.path().join("export"))
            .deliver(&id, &clips, &summary(&id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Delivery(_)));
    }
}
