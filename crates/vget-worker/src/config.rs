//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent jobs per process
    pub concurrency: usize,
    /// Wall-clock bound per extractor invocation
    pub job_timeout: Duration,
    /// Minimum progress-callback cadence; also the cancel polling period
    pub progress_heartbeat: Duration,
    /// Bound per artifact upload
    pub upload_timeout: Duration,
    /// Upload retries within one attempt
    pub upload_retries: u32,
    /// Root for per-reservation scratch directories
    pub scratch_root: PathBuf,
    /// Expected job duration, feeding the visibility window
    pub expected_job_duration: Duration,
    /// Graceful shutdown drain bound
    pub drain_timeout: Duration,
    /// Default attempt ceiling for jobs
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout: Duration::from_secs(30 * 60),
            progress_heartbeat: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(10 * 60),
            upload_retries: 3,
            scratch_root: std::env::temp_dir().join("vget"),
            expected_job_duration: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.concurrency),
            job_timeout: Duration::from_secs(
                std::env::var("JOB_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.job_timeout.as_secs()),
            ),
            progress_heartbeat: Duration::from_secs(
                std::env::var("PROGRESS_HEARTBEAT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.progress_heartbeat.as_secs()),
            ),
            upload_timeout: Duration::from_secs(
                std::env::var("UPLOAD_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.upload_timeout.as_secs()),
            ),
            upload_retries: defaults.upload_retries,
            scratch_root: std::env::var("WORKER_SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            expected_job_duration: defaults.expected_job_duration,
            drain_timeout: Duration::from_secs(
                std::env::var("WORKER_DRAIN_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.drain_timeout.as_secs()),
            ),
            max_attempts: std::env::var("MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
        }
    }

    /// Visibility window for reservations: twice the expected duration,
    /// floored at 5 minutes and capped at an hour.
    pub fn visibility(&self) -> Duration {
        let doubled = self.expected_job_duration * 2;
        doubled.clamp(Duration::from_secs(300), Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_is_clamped() {
        let mut config = WorkerConfig::default();
        assert_eq!(config.visibility(), Duration::from_secs(600));

        config.expected_job_duration = Duration::from_secs(10);
        assert_eq!(config.visibility(), Duration::from_secs(300));

        config.expected_job_duration = Duration::from_secs(10_000);
        assert_eq!(config.visibility(), Duration::from_secs(3600));
    }
}
