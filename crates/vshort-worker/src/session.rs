//! Per-job session workspaces.
//!
//! A session is a directory `{work_dir}/{session_id}/` with four sub-areas:
//!
//! ```text
//! {session_id}/
//! ├── .session.json   manifest with the creation time
//! ├── downloads/      acquired source
//! ├── converted/      reframed master
//! ├── clips/          segmented clips
//! └── output/         finished clips and subtitle tracks
//! ```
//!
//! Sessions never share a root: the directory is claimed with an exclusive
//! create, and a colliding id is replaced by a fresh one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use vshort_models::SessionId;

use crate::error::{WorkerError, WorkerResult};

pub const DOWNLOADS_DIR: &str = "downloads";
pub const CONVERTED_DIR: &str = "converted";
pub const CLIPS_DIR: &str = "clips";
pub const OUTPUT_DIR: &str = "output";

/// Manifest file inside each session root.
pub const MANIFEST_FILE: &str = ".session.json";

const MAX_CREATE_ATTEMPTS: usize = 8;

/// Source of session identifiers.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self) -> SessionId;
}

/// Random 128-bit identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSessionIds;

impl SessionIdGenerator for UuidSessionIds {
    fn generate(&self) -> SessionId {
        SessionId::random()
    }
}

/// Contents of [`MANIFEST_FILE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// Read a session manifest, if present and well formed.
pub async fn read_manifest(root: &Path) -> Option<SessionManifest> {
    let bytes = tokio::fs::read(root.join(MANIFEST_FILE)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// An allocated session workspace.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join(CONVERTED_DIR)
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join(CLIPS_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    /// Create the four sub-areas. Safe to call repeatedly.
    pub async fn ensure_layout(&self) -> WorkerResult<()> {
        for dir in [
            self.downloads_dir(),
            self.converted_dir(),
            self.clips_dir(),
            self.output_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Allocates sessions under a work directory.
#[derive(Clone)]
pub struct SessionLifecycle {
    work_dir: PathBuf,
    ids: Arc<dyn SessionIdGenerator>,
}

impl SessionLifecycle {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self::with_ids(work_dir, Arc::new(UuidSessionIds))
    }

    pub fn with_ids(work_dir: impl Into<PathBuf>, ids: Arc<dyn SessionIdGenerator>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ids,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Claim a fresh session directory, lay out its sub-areas and write its
    /// manifest.
    pub async fn create(&self) -> WorkerResult<Session> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = self.ids.generate();
            if !id.is_path_safe() {
                return Err(WorkerError::config(format!(
                    "session id generator produced unusable id {:?}",
                    id.as_str()
                )));
            }

            let root = self.work_dir.join(id.as_str());
            match tokio::fs::create_dir(&root).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("Session id {} already in use, generating another", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let session = Session {
                id,
                root,
                created_at: Utc::now(),
            };
            session.ensure_layout().await?;

            let manifest = SessionManifest {
                id: session.id.clone(),
                created_at: session.created_at,
            };
            let json = serde_json::to_vec_pretty(&manifest)
                .map_err(|e| WorkerError::config(format!("session manifest: {}", e)))?;
            tokio::fs::write(session.root.join(MANIFEST_FILE), json).await?;

            debug!("Created session {} at {}", session.id, session.root.display());
            return Ok(session);
        }

        Err(WorkerError::config(format!(
            "could not allocate a unique session after {} attempts",
            MAX_CREATE_ATTEMPTS
        )))
    }
}
