//! Worker configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vshort_models::style::DEFAULT_TARGET_HEIGHT;
use vshort_models::video::{
    DEFAULT_MAX_CLIP_SECONDS, DEFAULT_MAX_SOURCE_BYTES, DEFAULT_MAX_SOURCE_DURATION_SECS,
};
use vshort_models::ValidationLimits;
use vshort_media::transcribe::DEFAULT_WHISPER_MODEL;

use crate::error::{WorkerError, WorkerResult};

const SECS_PER_HOUR: u64 = 3600;

/// Predicate deciding whether a requester may run maintenance commands.
///
/// Supplied by whatever front-end receives user requests. The default denies
/// everyone.
#[derive(Clone)]
pub struct Authorization(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl Authorization {
    /// Allow exactly the given requester ids.
    pub fn allow_list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: HashSet<String> = ids
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self(Arc::new(move |requester| ids.contains(requester)))
    }

    pub fn deny_all() -> Self {
        Self(Arc::new(|_| false))
    }

    pub fn from_fn(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn allows(&self, requester: &str) -> bool {
        (self.0)(requester)
    }
}

impl Default for Authorization {
    fn default() -> Self {
        Self::deny_all()
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Authorization(..)")
    }
}

/// Worker configuration.
///
/// Built once at start-up and handed to the orchestrator; never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root directory holding one subdirectory per session
    pub work_dir: PathBuf,
    /// Size, duration and clip-length limits
    pub limits: ValidationLimits,
    /// Output canvas height (width follows at 9:16)
    pub target_height: u32,
    /// Bound on each ffmpeg/ffprobe/yt-dlp invocation
    pub command_timeout: Duration,
    /// Bound on each transcription
    pub transcribe_timeout: Duration,
    /// Whisper model size
    pub whisper_model: String,
    /// Clips captioned concurrently within one job
    pub max_parallel_clips: usize,
    /// Sessions older than this are reaped
    pub retention: Duration,
    /// Interval of the periodic reaper
    pub reap_interval: Duration,
    /// Guard for maintenance commands
    pub authorization: Authorization,
    /// Prometheus listen address, if metrics should be exported
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            limits: ValidationLimits::default(),
            target_height: DEFAULT_TARGET_HEIGHT,
            command_timeout: Duration::from_secs(300),
            transcribe_timeout: Duration::from_secs(600),
            whisper_model: DEFAULT_WHISPER_MODEL.to_string(),
            max_parallel_clips: 2,
            retention: Duration::from_secs(24 * SECS_PER_HOUR),
            reap_interval: Duration::from_secs(SECS_PER_HOUR),
            authorization: Authorization::default(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup. Unset or unparsable
    /// values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let num = |key: &str, default: u64| -> u64 {
            parse(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let float = |key: &str, default: f64| -> f64 {
            parse(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let authorization = match parse("VSHORT_ADMIN_IDS") {
            Some(ids) => Authorization::allow_list(ids.split(',')),
            None => Authorization::deny_all(),
        };

        Self {
            work_dir: parse("VSHORT_WORK_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./work")),
            limits: ValidationLimits {
                max_source_bytes: num("VSHORT_MAX_SOURCE_BYTES", DEFAULT_MAX_SOURCE_BYTES),
                max_source_duration: float(
                    "VSHORT_MAX_SOURCE_DURATION_SECS",
                    DEFAULT_MAX_SOURCE_DURATION_SECS,
                ),
                max_clip_seconds: float("VSHORT_MAX_CLIP_SECONDS", DEFAULT_MAX_CLIP_SECONDS),
            },
            target_height: num("VSHORT_TARGET_HEIGHT", DEFAULT_TARGET_HEIGHT as u64) as u32,
            command_timeout: Duration::from_secs(num("VSHORT_COMMAND_TIMEOUT_SECS", 300)),
            transcribe_timeout: Duration::from_secs(num("VSHORT_TRANSCRIBE_TIMEOUT_SECS", 600)),
            whisper_model: parse("VSHORT_WHISPER_MODEL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_WHISPER_MODEL.to_string()),
            max_parallel_clips: num("VSHORT_MAX_PARALLEL_CLIPS", 2) as usize,
            retention: Duration::from_secs(num("VSHORT_RETENTION_HOURS", 24) * SECS_PER_HOUR),
            reap_interval: Duration::from_secs(num("VSHORT_REAP_INTERVAL_SECS", SECS_PER_HOUR)),
            authorization,
            metrics_addr: parse("VSHORT_METRICS_ADDR").filter(|v| !v.is_empty()),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        let limits = &self.limits;
        if !(limits.max_clip_seconds > 0.0) || !limits.max_clip_seconds.is_finite() {
            return Err(WorkerError::config("max clip seconds must be positive"));
        }
        if !(limits.max_source_duration > 0.0) {
            return Err(WorkerError::config("max source duration must be positive"));
        }
        if limits.max_source_bytes == 0 {
            return Err(WorkerError::config("max source bytes must be positive"));
        }
        if self.target_height < 16 {
            return Err(WorkerError::config("target height is too small"));
        }
        if self.max_parallel_clips == 0 {
            return Err(WorkerError::config("max parallel clips must be at least 1"));
        }
        if self.command_timeout.is_zero() || self.transcribe_timeout.is_zero() {
            return Err(WorkerError::config("timeouts must be non-zero"));
        }
        if self.retention.is_zero() || self.reap_interval.is_zero() {
            return Err(WorkerError::config("retention and reap interval must be non-zero"));
        }
        Ok(())
    }

    /// Retention window in whole hours, as reported to requesters.
    pub fn retention_hours(&self) -> u64 {
        self.retention.as_secs() / SECS_PER_HOUR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.work_dir, PathBuf::from("./work"));
        assert_eq!(config.limits.max_clip_seconds, 50.0);
        assert_eq!(config.limits.max_source_bytes, 500 * 1024 * 1024);
        assert_eq!(config.limits.max_source_duration, 3600.0);
        assert_eq!(config.target_height, 1920);
        assert_eq!(config.retention_hours(), 24);
        assert_eq!(config.whisper_model, "base");
        assert!(config.metrics_addr.is_none());
        assert!(!config.authorization.allows("anyone"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("VSHORT_WORK_DIR", "/srv/vshort"),
            ("VSHORT_MAX_CLIP_SECONDS", "30.5"),
            ("VSHORT_RETENTION_HOURS", "6"),
            ("VSHORT_MAX_PARALLEL_CLIPS", "4"),
            ("VSHORT_ADMIN_IDS", " 42, 7 ,,"),
            ("VSHORT_WHISPER_MODEL", "small"),
        ]));
        assert_eq!(config.work_dir, PathBuf::from("/srv/vshort"));
        assert_eq!(config.limits.max_clip_seconds, 30.5);
        assert_eq!(config.retention, Duration::from_secs(6 * 3600));
        assert_eq!(config.max_parallel_clips, 4);
        assert_eq!(config.whisper_model, "small");
        assert!(config.authorization.allows("42"));
        assert!(config.authorization.allows("7"));
        assert!(!config.authorization.allows(""));
        assert!(!config.authorization.allows("8"));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("VSHORT_MAX_CLIP_SECONDS", "fifty"),
            ("VSHORT_COMMAND_TIMEOUT_SECS", "-1"),
        ]));
        assert_eq!(config.limits.max_clip_seconds, 50.0);
        assert_eq!(config.command_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WorkerConfig::default();
        config.limits.max_clip_seconds = 0.0;
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));

        let mut config = WorkerConfig::default();
        config.max_parallel_clips = 0;
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::default();
        config.command_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_authorization_from_fn() {
        let auth = Authorization::from_fn(|id| id.starts_with("admin-"));
        assert!(auth.allows("admin-1"));
        assert!(!auth.allows("user-1"));
        assert_eq!(format!("{:?}", auth), "Authorization(..)");
    }
}
