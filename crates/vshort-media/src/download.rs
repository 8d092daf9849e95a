//! Video download using yt-dlp.
//!
//! A download either yields exactly one media file inside the target
//! directory or fails. There are no retries.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

use crate::command::{check_ytdlp, run_captured, RunLimits};
use crate::error::{MediaError, MediaResult};

/// Fetches a remote video into a directory.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str, out_dir: &Path, limits: &RunLimits)
        -> MediaResult<PathBuf>;
}

/// [`Downloader`] backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    /// yt-dlp format selector
    format: String,
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self {
            format: "best[height<=1080]/best".to_string(),
        }
    }
}

impl YtDlpDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_args(&self, url: &str, out_dir: &Path) -> Vec<String> {
        let template = out_dir.join("%(title).100s-%(id)s.%(ext)s");
        vec![
            "-f".to_string(),
            self.format.clone(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--no-playlist".to_string(),
            "--restrict-filenames".to_string(),
            "--no-progress".to_string(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(
        &self,
        url: &str,
        out_dir: &Path,
        limits: &RunLimits,
    ) -> MediaResult<PathBuf> {
        let ytdlp = check_ytdlp()?;
        tokio::fs::create_dir_all(out_dir).await?;

        info!("Downloading {}", url);
        run_captured(&ytdlp, &self.build_args(url, out_dir), limits)
            .await
            .map_err(|e| match e {
                MediaError::CommandFailed { message, .. } => MediaError::download_failed(message),
                other => other,
            })?;

        let path = newest_file(out_dir)
            .await?
            .ok_or_else(|| MediaError::download_failed("no file was produced"))?;
        debug!("Downloaded to {}", path.display());
        Ok(path)
    }
}

/// Most recently modified finished file in `dir`.
///
/// yt-dlp's in-progress artifacts (`.part`, `.ytdl`) are ignored.
pub async fn newest_file(dir: &Path) -> MediaResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let partial = path
            .extension()
            .map(|e| e == "part" || e == "ytdl")
            .unwrap_or(false);
        if partial {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
