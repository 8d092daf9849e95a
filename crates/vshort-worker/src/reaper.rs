//! Expiry of old sessions.
//!
//! A session's age is taken from its manifest, or from the directory's
//! modification time when the manifest is missing. Removal is best effort:
//! failures are logged and counted, never returned. A listing error ends the
//! sweep early with whatever was removed so far.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::WorkerResult;
use crate::metrics;
use crate::session::read_manifest;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReapReport {
    /// Session directories examined
    pub scanned: usize,
    /// Session directories deleted
    pub removed: Vec<String>,
    /// Expired sessions that could not be (fully) deleted
    pub failed: usize,
}

/// Deletes sessions older than the retention window.
#[derive(Debug, Clone)]
pub struct Reaper {
    work_dir: PathBuf,
    retention: Duration,
}

impl Reaper {
    pub fn new(work_dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            retention,
        }
    }

    /// Sweep relative to the current time.
    pub async fn sweep(&self) -> WorkerResult<ReapReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Delete every session strictly older than the retention window at `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> WorkerResult<ReapReport> {
        let entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReapReport::default())
            }
            Err(e) => return Err(e.into()),
        };

        let listing = stream::unfold(entries, |mut entries| async move {
            match entries.next_entry().await {
                Ok(Some(entry)) => Some((Ok(entry.path()), entries)),
                Ok(None) => None,
                Err(e) => Some((Err(e), entries)),
            }
        });
        Ok(self.reap_listing(listing, now).await)
    }

    /// Remove expired session directories from `listing`. A listing error
    /// ends the sweep.
    async fn reap_listing<S>(&self, listing: S, now: DateTime<Utc>) -> ReapReport
    where
        S: Stream<Item = std::io::Result<PathBuf>>,
    {
        let mut report = ReapReport::default();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        futures::pin_mut!(listing);
        while let Some(item) = listing.next().await {
            let path = match item {
                Ok(path) => path,
                Err(e) => {
                    warn!(
                        "Stopping sweep of {} after read error: {}",
                        self.work_dir.display(),
                        e
                    );
                    break;
                }
            };
            let is_dir = tokio::fs::symlink_metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            report.scanned += 1;

            let Some(created_at) = session_created_at(&path).await else {
                warn!("Cannot determine age of {}, skipping", path.display());
                continue;
            };
            if now.signed_duration_since(created_at) <= retention {
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!("Removed expired session {}", name);
                    report.removed.push(name);
                }
                Err(e) => {
                    warn!("Failed to remove expired session {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        if !report.removed.is_empty() {
            info!(
                "Reaped {} expired session(s) from {}",
                report.removed.len(),
                self.work_dir.display()
            );
        }
        metrics::record_sessions_reaped(report.removed.len());
        report
    }

    /// Sweep every `interval` until `shutdown` turns true.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("Session sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping periodic session sweep");
                        return;
                    }
                }
            }
        }
    }
}

async fn session_created_at(root: &Path) -> Option<DateTime<Utc>> {
    if let Some(manifest) = read_manifest(root).await {
        return Some(manifest.created_at);
    }
    let modified = tokio::fs::metadata(root).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
