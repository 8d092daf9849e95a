//! Prometheus metrics for the worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use vshort_models::ClipStatus;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vshort_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vshort_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vshort_job_duration_seconds";
    pub const CLIPS_TOTAL: &str = "vshort_clips_total";
    pub const SESSIONS_REAPED_TOTAL: &str = "vshort_sessions_reaped_total";
}

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
pub fn install_exporter(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config(format!("invalid metrics address {}: {}", addr, e)))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config(format!("failed to install metrics exporter: {}", e)))
}

/// Record a delivered job.
pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job by error kind.
pub fn record_job_failed(kind: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind).increment(1);
}

/// Record a finished clip.
pub fn record_clip(status: ClipStatus) {
    counter!(names::CLIPS_TOTAL, "status" => status.as_str()).increment(1);
}

/// Record reaped sessions.
pub fn record_sessions_reaped(count: usize) {
    counter!(names::SESSIONS_REAPED_TOTAL).increment(count as u64);
}
